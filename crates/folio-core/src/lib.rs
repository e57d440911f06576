//! Folio Core - album playlist sequencing and playback
//!
//! This crate provides the library index, the flattened play sequence with
//! shuffle and repeat, the playback controller that drives an audio engine
//! through stop/start transitions, and a symphonia/cpal engine.

pub mod command;
pub mod controller;
pub mod decoder;
pub mod engine;
pub mod library;
pub mod model;
pub mod output;
pub mod playlist;
pub mod renderer;
pub mod runtime;
pub mod selection;
pub mod session;

pub use command::{ Command, CommandError };
pub use controller::{ PlaybackController, StopReason };
pub use engine::{ AudioEngine, EngineError, EngineEvent, PlaybackState, Progress };
pub use library::{ AlbumKey, Library, LibraryError, LibraryScanner, PlayRequest };
pub use model::{ Playlist, PlaylistInfo, TrackInfo };
pub use playlist::{ PlaylistError, PlaylistManager, RepeatMode };
pub use renderer::Renderer;
pub use runtime::RuntimeConfig;
pub use selection::{ NowPlaying, SelectionSink, SelectionUpdate };
pub use session::{ AccessScope, OpenAccess };
