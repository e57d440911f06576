//! Playlist sequencing
//!
//! Flattens a batch of album playlists into one linear sequence and
//! serves forward, backward and random-access navigation over it, in
//! natural or shuffled order.

use std::path::PathBuf;

use rand::seq::SliceRandom;
use thiserror::Error;

use crate::model::{ Playlist, TrackInfo };


/// Errors that can occur when configuring a sequence.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum PlaylistError {
    #[error( "No tracks to play" )]
    EmptySequence,

    #[error( "Start track {ordinal} is beyond the last track ({track_count})" )]
    StartOutOfRange { ordinal: usize, track_count: usize },
}


/// Repeat mode for a playback session.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum RepeatMode {
    #[default]
    Off,
    One,
    All,
}


impl RepeatMode {
    /// Next mode in the Off → One → All cycle.
    pub fn cycle( self ) -> Self {
        match self {
            RepeatMode::Off => RepeatMode::One,
            RepeatMode::One => RepeatMode::All,
            RepeatMode::All => RepeatMode::Off,
        }
    }
}


/// One entry of the natural sequence.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
struct Entry {
    playlist: usize,
    track: usize,
}


/// Sequencer over the flattened tracks of a set of playlists.
#[derive( Debug, Default )]
pub struct PlaylistManager {
    root: PathBuf,
    playlists: Vec<Playlist>,
    // Natural order
    entries: Vec<Entry>,
    // Active ordering (indices into entries)
    order: Vec<usize>,
    shuffle: bool,
    // Position in `order` that the next advance() yields
    cursor: usize,
    // Position in `order` of the track last handed out as current
    current: Option<usize>,
}


impl PlaylistManager {
    /// Creates an empty manager resolving tracks against `root`.
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }


    /// Replaces the sequence with `playlists`.
    ///
    /// The next `advance()` yields ordinal `start_ordinal` (0 and 1 both
    /// mean the first track). When shuffling, the start ordinal is ignored
    /// and the session starts at the top of the fresh permutation.
    pub fn load(
        &mut self,
        playlists: Vec<Playlist>,
        start_ordinal: usize,
        shuffle: bool,
    ) -> Result<(), PlaylistError> {
        let entries: Vec<Entry> = playlists.iter()
            .enumerate()
            .flat_map( |( p, playlist )| {
                ( 0..playlist.len() ).map( move |t| Entry { playlist: p, track: t } )
            })
            .collect();

        if entries.is_empty() {
            return Err( PlaylistError::EmptySequence );
        }

        let start = if shuffle { 0 } else { start_ordinal.saturating_sub( 1 ) };
        if start >= entries.len() {
            return Err( PlaylistError::StartOutOfRange {
                ordinal: start_ordinal,
                track_count: entries.len(),
            });
        }

        tracing::debug!(
            "Loaded {} playlists, {} tracks, shuffle={}, start={}",
            playlists.len(),
            entries.len(),
            shuffle,
            start + 1
        );

        self.playlists = playlists;
        self.entries = entries;
        self.shuffle = shuffle;
        self.regenerate_order();
        self.cursor = start;
        self.current = None;
        Ok(())
    }


    /// Returns the track under the cursor and moves past it.
    ///
    /// Must be called exactly once per track actually started.
    pub fn advance( &mut self ) -> Option<TrackInfo> {
        let track = self.track_at( self.cursor )?;
        self.current = Some( self.cursor );
        self.cursor += 1;
        Some( track )
    }


    /// The track the next `advance()` will return.
    pub fn peek_next( &self ) -> Option<TrackInfo> {
        self.track_at( self.cursor )
    }


    /// Makes `ordinal` the track about to start and returns it.
    ///
    /// The next `advance()` returns this same track, the one after it
    /// returns `ordinal + 1`.
    pub fn jump_to( &mut self, ordinal: usize ) -> Option<TrackInfo> {
        if ordinal == 0 {
            return None;
        }
        let track = self.track_at( ordinal - 1 )?;
        self.cursor = ordinal - 1;
        Some( track )
    }


    pub fn has_previous( &self, ordinal: usize ) -> bool {
        ordinal > 1
    }


    pub fn has_next( &self, ordinal: usize ) -> bool {
        ordinal < self.track_count()
    }


    /// Looks up the track at 0-based `index` in the active ordering.
    pub fn track_at( &self, index: usize ) -> Option<TrackInfo> {
        let entry = self.entries.get( *self.order.get( index )? )?;
        let playlist = self.playlists.get( entry.playlist )?;
        let file_name = playlist.track_file_names.get( entry.track )?;
        Some( TrackInfo::resolve( &self.root, &playlist.info, file_name, index + 1 ) )
    }


    /// Finds the 0-based position of `track` in the active ordering.
    pub fn index_for( &self, track: &TrackInfo ) -> Option<usize> {
        self.order.iter().position( |&e| {
            let entry = self.entries[ e ];
            let playlist = &self.playlists[ entry.playlist ];
            playlist.info == *track.playlist()
                && playlist.track_file_names[ entry.track ] == track.file_name()
        })
    }


    /// Regenerates the ordering and rewinds to the first track.
    pub fn reset( &mut self ) {
        self.regenerate_order();
        self.cursor = 0;
        self.current = None;
    }


    /// Sets shuffle mode, regenerates the ordering and rewinds.
    pub fn reset_with_shuffle( &mut self, shuffle: bool ) {
        self.shuffle = shuffle;
        self.reset();
    }


    /// Switches ordering while keeping the current track current.
    ///
    /// Returns the current track's ordinal in the new ordering, or 0 when
    /// no track has been started yet.
    pub fn on_shuffle_mode_changed( &mut self, shuffle: bool ) -> usize {
        let playing = self.current.and_then( |c| self.order.get( c ).copied() );

        self.shuffle = shuffle;
        self.regenerate_order();

        match playing.and_then( |e| self.order.iter().position( |&o| o == e ) ) {
            Some( position ) => {
                self.current = Some( position );
                self.cursor = position + 1;
                position + 1
            }
            None => {
                self.current = None;
                self.cursor = 0;
                0
            }
        }
    }


    /// Total number of tracks in the sequence.
    pub fn track_count( &self ) -> usize {
        self.entries.len()
    }


    pub fn is_loaded( &self ) -> bool {
        !self.entries.is_empty()
    }


    pub fn shuffle( &self ) -> bool {
        self.shuffle
    }


    pub fn playlists( &self ) -> &[Playlist] {
        &self.playlists
    }


    /// Display names of every track in the active ordering.
    pub fn track_names( &self ) -> Vec<String> {
        ( 0..self.order.len() )
            .filter_map( |i| self.track_at( i ) )
            .map( |t| t.title().to_string() )
            .collect()
    }


    fn regenerate_order( &mut self ) {
        self.order = ( 0..self.entries.len() ).collect();
        if self.shuffle {
            self.order.shuffle( &mut rand::thread_rng() );
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use crate::model::PlaylistInfo;


    fn album( path: &str, tracks: &[&str] ) -> Playlist {
        Playlist::new(
            PlaylistInfo::new( "album.m3u", path, tracks.len() ),
            tracks.iter().map( |t| t.to_string() ).collect(),
        )
    }


    fn three_albums() -> Vec<Playlist> {
        vec![
            album( "Rock/A/First", &[ "a1.mp3", "a2.mp3" ] ),
            album( "Rock/B/Second", &[ "b1.mp3" ] ),
            album( "Jazz/C/Third", &[ "c1.mp3", "c2.mp3", "c3.mp3" ] ),
        ]
    }


    fn loaded( shuffle: bool ) -> PlaylistManager {
        let mut manager = PlaylistManager::new( "/music" );
        manager.load( three_albums(), 0, shuffle ).unwrap();
        manager
    }


    #[test]
    fn test_natural_order_walk() {
        let mut manager = loaded( false );
        assert_eq!( manager.track_count(), 6 );

        let names: Vec<( usize, String )> = std::iter::from_fn( || manager.advance() )
            .map( |t| ( t.ordinal(), t.file_name().to_string() ) )
            .collect();

        assert_eq!( names, vec![
            ( 1, "a1.mp3".to_string() ),
            ( 2, "a2.mp3".to_string() ),
            ( 3, "b1.mp3".to_string() ),
            ( 4, "c1.mp3".to_string() ),
            ( 5, "c2.mp3".to_string() ),
            ( 6, "c3.mp3".to_string() ),
        ]);
        assert!( manager.advance().is_none() );
        assert!( manager.peek_next().is_none() );
    }


    #[test]
    fn test_load_rejects_empty_sequence() {
        let mut manager = PlaylistManager::new( "/music" );
        let result = manager.load( vec![ album( "X/Y/Z", &[] ) ], 0, false );
        assert_eq!( result, Err( PlaylistError::EmptySequence ) );
        assert!( !manager.is_loaded() );
    }


    #[test]
    fn test_load_skips_empty_playlists() {
        let mut manager = PlaylistManager::new( "/music" );
        let playlists = vec![
            album( "X/Y/Empty", &[] ),
            album( "X/Y/Full", &[ "1.mp3", "2.mp3" ] ),
        ];
        manager.load( playlists, 0, false ).unwrap();
        assert_eq!( manager.track_count(), 2 );
        assert_eq!( manager.advance().unwrap().file_name(), "1.mp3" );
    }


    #[test]
    fn test_load_start_ordinal() {
        let mut manager = PlaylistManager::new( "/music" );
        manager.load( three_albums(), 4, false ).unwrap();
        let track = manager.advance().unwrap();
        assert_eq!( track.ordinal(), 4 );
        assert_eq!( track.file_name(), "c1.mp3" );
    }


    #[test]
    fn test_load_start_out_of_range() {
        let mut manager = PlaylistManager::new( "/music" );
        let result = manager.load( three_albums(), 7, false );
        assert_eq!( result, Err( PlaylistError::StartOutOfRange { ordinal: 7, track_count: 6 } ) );
    }


    #[test]
    fn test_shuffle_ignores_start_ordinal() {
        let mut manager = PlaylistManager::new( "/music" );
        manager.load( three_albums(), 5, true ).unwrap();
        assert_eq!( manager.advance().unwrap().ordinal(), 1 );
    }


    #[test]
    fn test_peek_does_not_mutate() {
        let mut manager = loaded( true );
        for _ in 0..manager.track_count() {
            let peeked = manager.peek_next();
            assert_eq!( peeked, manager.advance() );
        }
    }


    #[test]
    fn test_jump_to_bounds() {
        let mut manager = loaded( false );
        assert!( manager.jump_to( 0 ).is_none() );
        assert!( manager.jump_to( 7 ).is_none() );

        let jumped = manager.jump_to( 3 ).unwrap();
        assert_eq!( jumped.file_name(), "b1.mp3" );
        assert_eq!( manager.advance().unwrap().ordinal(), 3 );
        assert_eq!( manager.advance().unwrap().ordinal(), 4 );

        manager.jump_to( 6 ).unwrap();
        assert_eq!( manager.advance().unwrap().ordinal(), 6 );
        assert!( manager.advance().is_none() );
    }


    #[test]
    fn test_has_previous_and_next() {
        let manager = loaded( false );
        assert!( !manager.has_previous( 1 ) );
        assert!( manager.has_previous( 2 ) );
        assert!( !manager.has_next( 6 ) );
        assert!( manager.has_next( 5 ) );
    }


    #[test]
    fn test_index_for_round_trip() {
        let manager = loaded( true );
        for i in 0..manager.track_count() {
            let track = manager.track_at( i ).unwrap();
            assert_eq!( manager.index_for( &track ), Some( i ) );
        }
    }


    #[test]
    fn test_index_for_matches_playlist_not_just_name() {
        let mut manager = PlaylistManager::new( "/music" );
        manager.load( vec![
            album( "A/B/One", &[ "01.mp3" ] ),
            album( "A/B/Two", &[ "01.mp3" ] ),
        ], 0, false ).unwrap();

        let second = manager.track_at( 1 ).unwrap();
        assert_eq!( manager.index_for( &second ), Some( 1 ) );
    }


    #[test]
    fn test_shuffle_switch_keeps_current_track() {
        let mut manager = loaded( false );
        manager.advance();
        manager.advance();
        let playing = manager.advance().unwrap();
        assert_eq!( playing.ordinal(), 3 );

        let shuffled = manager.on_shuffle_mode_changed( true );
        assert!( manager.shuffle() );
        assert!( manager.track_at( shuffled - 1 ).unwrap().same_track( &playing ) );

        let natural = manager.on_shuffle_mode_changed( false );
        assert_eq!( natural, 3 );
        assert_eq!( manager.advance().unwrap().ordinal(), 4 );
    }


    #[test]
    fn test_shuffle_switch_before_start() {
        let mut manager = loaded( false );
        assert_eq!( manager.on_shuffle_mode_changed( true ), 0 );
        assert_eq!( manager.advance().unwrap().ordinal(), 1 );
    }


    #[test]
    fn test_reset_rewinds() {
        let mut manager = loaded( false );
        manager.advance();
        manager.advance();
        manager.reset();
        assert_eq!( manager.advance().unwrap().file_name(), "a1.mp3" );

        manager.reset_with_shuffle( true );
        assert!( manager.shuffle() );
        assert_eq!( manager.advance().unwrap().ordinal(), 1 );
    }


    #[test]
    fn test_repeat_cycle() {
        assert_eq!( RepeatMode::Off.cycle(), RepeatMode::One );
        assert_eq!( RepeatMode::One.cycle(), RepeatMode::All );
        assert_eq!( RepeatMode::All.cycle(), RepeatMode::Off );
    }
}
