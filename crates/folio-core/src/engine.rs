//! Audio engine boundary
//!
//! The controller drives playback through [`AudioEngine`] and learns what
//! actually happened from [`EngineEvent`]s, which engines send from their
//! own threads.

use std::path::Path;
use std::time::Duration;

use thiserror::Error;


/// Errors reported by an audio engine transport call.
#[derive( Debug, Error )]
pub enum EngineError {
    #[error( "Failed to open file: {0}" )]
    FileOpen( String ),

    #[error( "Decode error: {0}" )]
    Decode( String ),

    #[error( "Audio output error: {0}" )]
    Output( String ),

    #[error( "Audio engine is no longer running" )]
    Disconnected,
}


/// Playback state as observed from the engine.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum PlaybackState {
    #[default]
    Stopped,
    Playing,
    Paused,
}


impl PlaybackState {
    /// True while a track is loaded in the engine (playing or paused).
    pub fn is_active( self ) -> bool {
        self != PlaybackState::Stopped
    }
}


/// Asynchronous notifications from the engine.
#[derive( Debug, Clone, PartialEq )]
pub enum EngineEvent {
    /// The engine began rendering a new track (started or gapless continuation).
    NowPlayingChanged,
    StateChanged( PlaybackState ),
    Error( String ),
}


/// Elapsed time within the rendering track.
#[derive( Debug, Clone, Copy, PartialEq )]
pub struct Progress {
    pub elapsed: Duration,
    pub duration: Option<Duration>,
}


impl Progress {
    /// Elapsed time as a fraction of the duration, when known.
    pub fn fraction( &self ) -> Option<f64> {
        let total = self.duration?.as_secs_f64();
        ( total > 0.0 ).then( || ( self.elapsed.as_secs_f64() / total ).clamp( 0.0, 1.0 ) )
    }
}


/// Playback transport.
///
/// Calls return once the request is accepted; the resulting transitions
/// arrive later as [`EngineEvent`]s.
pub trait AudioEngine: Send {
    /// Starts rendering `url`, replacing anything queued.
    fn play( &mut self, url: &Path ) -> Result<(), EngineError>;

    /// Schedules `url` to follow the current track without a gap.
    fn enqueue( &mut self, url: &Path ) -> Result<(), EngineError>;

    fn pause( &mut self );

    fn resume( &mut self );

    fn stop( &mut self );

    /// Drops every queued track.
    fn clear_queue( &mut self );

    /// Seeks within the current track; `fraction` is in `0.0..=1.0`.
    fn seek( &mut self, fraction: f64 );

    fn progress( &self ) -> Option<Progress>;
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_progress_fraction() {
        let progress = Progress {
            elapsed: Duration::from_secs( 30 ),
            duration: Some( Duration::from_secs( 120 ) ),
        };
        assert_eq!( progress.fraction(), Some( 0.25 ) );

        let unknown = Progress { elapsed: Duration::from_secs( 3 ), duration: None };
        assert_eq!( unknown.fraction(), None );
    }
}
