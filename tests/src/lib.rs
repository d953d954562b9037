//! Shared test support: a local ranged media server and a shared runtime.

pub mod setup;

pub use fixture::MediaFixture;
