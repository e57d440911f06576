//! View-state updates
//!
//! The controller pushes display state to a [`SelectionSink`]; the sink
//! never reaches back into the controller.

use crate::engine::{ PlaybackState, Progress };
use crate::model::TrackInfo;
use crate::playlist::RepeatMode;


/// One consistent snapshot of what is playing.
#[derive( Debug, Clone, PartialEq )]
pub struct NowPlaying {
    pub track: Option<TrackInfo>,
    /// 1-based ordinal of the rendering track, 0 when idle.
    pub position: usize,
    pub total: usize,
    pub state: PlaybackState,
    pub seek_enabled: bool,
    pub shuffle: bool,
    pub repeat: RepeatMode,
}


/// Updates pushed to the view.
#[derive( Debug, Clone, PartialEq )]
pub enum SelectionUpdate {
    NowPlaying( NowPlaying ),
    /// Track names of the active ordering and the row to keep highlighted.
    TrackList { names: Vec<String>, selected: Option<usize> },
    Progress( Progress ),
    TrackDetails( TrackInfo ),
    /// Entries one level below `path` in the library (types, artists, albums or tracks).
    Listing { path: String, entries: Vec<String> },
    Alert( String ),
}


/// Receiver of view updates.
pub trait SelectionSink: Send {
    fn publish( &mut self, update: SelectionUpdate );
}


impl<F> SelectionSink for F
where
    F: FnMut( SelectionUpdate ) + Send,
{
    fn publish( &mut self, update: SelectionUpdate ) {
        self( update )
    }
}
