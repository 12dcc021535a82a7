//! Songbird Core - Playback orchestration for networked speakers
//!
//! This crate indexes a local music collection, serves it over HTTP,
//! discovers and drives a speaker, and reports what it is playing.

pub mod catalog;
pub mod command;
pub mod config;
pub mod controller;
pub mod device;
pub mod library;
pub mod media_server;
pub mod now_playing;
pub mod orchestrator;
mod xml;

pub use catalog::{ Catalog, CatalogError, CatalogRecord, DirectoryCatalog };
pub use command::{ CommandError, PlaybackCommand };
pub use config::CoreConfig;
pub use controller::{ DeviceController, SharedState };
pub use device::{ Device, DeviceError, SonosDevice, TrackInfo };
pub use library::{ AlbumKey, LibraryError, LibraryIndex };
pub use media_server::{ MediaEndpoint, MediaServer, MediaServerError, MediaServerState };
pub use now_playing::{ MetadataError, NowPlayingTracker, NowPlayingView };
pub use orchestrator::{ CoreEvent, FatalError, Orchestrator, Presenter };
