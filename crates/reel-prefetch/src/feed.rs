//! Paged feed generation.
//!
//! The repository cycles through a fixed catalogue, page by page. Every produced item
//! gets a fresh slot id (`instance_<absolute_index>_<catalogue_id>`) while keeping the
//! catalogue locator, so the same content shows up under many ids as the user keeps
//! scrolling. Cache identity must come from the locator for that reason.

use std::sync::Arc;

use tracing::debug;

use crate::model::MediaRef;

/// Items per page.
pub const DEFAULT_PAGE_SIZE: usize = 5;

#[derive(Debug, Clone)]
pub struct FeedRepository {
    catalogue: Arc<[MediaRef]>,
    page_size: usize,
    page: usize,
}

impl FeedRepository {
    pub fn new(catalogue: impl Into<Arc<[MediaRef]>>) -> Self {
        Self {
            catalogue: catalogue.into(),
            page_size: DEFAULT_PAGE_SIZE,
            page: 0,
        }
    }

    /// Repository over [`sample_catalogue`].
    pub fn sample() -> Self {
        Self::new(sample_catalogue())
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn catalogue(&self) -> &[MediaRef] {
        &self.catalogue
    }

    /// Index of the last produced page.
    pub fn page(&self) -> usize {
        self.page
    }

    /// Restart from the first page.
    pub fn load_initial(&mut self) -> Vec<MediaRef> {
        self.page = 0;
        self.generate_page(0)
    }

    /// Produce the next page.
    pub fn load_more(&mut self) -> Vec<MediaRef> {
        self.page += 1;
        self.generate_page(self.page)
    }

    fn generate_page(&self, page: usize) -> Vec<MediaRef> {
        if self.catalogue.is_empty() {
            return Vec::new();
        }
        let start = page * self.page_size;
        let items: Vec<MediaRef> = (start..start + self.page_size)
            .map(|absolute| {
                let template = &self.catalogue[absolute % self.catalogue.len()];
                template.with_id(format!("instance_{}_{}", absolute, template.id))
            })
            .collect();
        debug!(page, count = items.len(), "feed: page generated");
        items
    }
}

/// Public sample videos plus one image carousel.
pub fn sample_catalogue() -> Vec<MediaRef> {
    vec![
        MediaRef::video("0", "http://vjs.zencdn.net/v/oceans.mp4"),
        MediaRef::image_set(
            "image_carousel_1",
            [
                "https://images.pexels.com/photos/3225517/pexels-photo-3225517.jpeg",
                "https://images.pexels.com/photos/2387873/pexels-photo-2387873.jpeg",
                "https://images.pexels.com/photos/1528640/pexels-photo-1528640.jpeg",
                "https://images.pexels.com/photos/33041/antelope-canyon-lower-canyon-arizona.jpg",
            ],
        ),
        MediaRef::video("1", "https://media.w3.org/2010/05/sintel/trailer.mp4"),
        MediaRef::video(
            "2",
            "http://mirror.aarnet.edu.au/pub/TED-talks/911Mothers_2010W-480p.mp4",
        ),
        MediaRef::video(
            "3",
            "https://cesium.com/public/SandcastleSampleData/big-buck-bunny_trailer.mp4",
        ),
        MediaRef::video(
            "4",
            "https://stream7.iqilu.com/10339/upload_transcode/202002/09/20200209105011F0zPoYzHry.mp4",
        ),
        MediaRef::video(
            "5",
            "https://stream7.iqilu.com/10339/upload_transcode/202002/09/20200209104902N3v5Vpxuvb.mp4",
        ),
        MediaRef::video("6", "https://www.w3schools.com/html/movie.mp4"),
        MediaRef::video(
            "7",
            "https://sf1-cdn-tos.huoshanstatic.com/obj/media-fe/xgplayer_doc_video/mp4/xgplayer-demo-360p.mp4",
        ),
        MediaRef::video("8", "https://www.w3school.com.cn/example/html5/mov_bbb.mp4"),
        MediaRef::video(
            "9",
            "http://devimages.apple.com/iphone/samples/bipbop/bipbopall.m3u8",
        ),
    ]
}
