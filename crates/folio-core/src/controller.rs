//! Playback state machine
//!
//! Sits between user commands and the audio engine. Commands that need
//! the engine idle record a [`StopReason`], ask the engine to stop, and
//! finish their work when the engine reports `Stopped`. Play and stop are
//! never issued back to back.

use std::mem;
use std::path::Path;

use crate::engine::{ AudioEngine, EngineError, EngineEvent, PlaybackState };
use crate::library::{ AlbumKey, Library, LibraryError, PlayRequest };
use crate::model::{ Playlist, TrackInfo };
use crate::playlist::{ PlaylistManager, RepeatMode };
use crate::selection::{ NowPlaying, SelectionSink, SelectionUpdate };
use crate::session::AccessScope;


/// Pointer appended to user-facing failure alerts.
const LOG_HINT: &str = "Check the log for details.";


/// Why the engine was last asked to stop.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum StopReason {
    PlaybackError,
    #[default]
    EndOfAudio,
    PlayAllRequested,
    StopRequested,
    TrackRequested,
    PlayingTrackRequested,
    PreviousRequested,
    NextRequested,
    RestartRequested,
    ReshuffleRequested,
}


/// Where to go once the engine confirms it stopped.
#[derive( Debug )]
enum PendingStart {
    /// Start a new sequence.
    Fresh { playlists: Vec<Playlist>, ordinal: usize },
    /// Jump within the current sequence.
    Jump { ordinal: usize },
}


/// Drives the playlist manager and the audio engine.
pub struct PlaybackController {
    library: Library,
    manager: PlaylistManager,
    engine: Box<dyn AudioEngine>,
    sink: Box<dyn SelectionSink>,
    scope: Box<dyn AccessScope>,

    // Observed engine state
    state: PlaybackState,
    stop_reason: StopReason,
    stop_pending: bool,
    /// Position when the outstanding stop was requested.
    stop_origin: usize,
    pending: Option<PendingStart>,

    /// Ordinal of the rendering track; kept in lockstep with the manager cursor.
    position: usize,
    current: Option<TrackInfo>,
    /// Set once the engine reports the started track is rendering.
    now_playing: bool,

    shuffle: bool,
    repeat: RepeatMode,
    /// Row highlighted in the view, 0-based.
    selected_row: Option<usize>,
    scope_held: bool,
}


impl PlaybackController {
    pub fn new(
        library: Library,
        engine: Box<dyn AudioEngine>,
        sink: Box<dyn SelectionSink>,
        scope: Box<dyn AccessScope>,
    ) -> Self {
        let manager = PlaylistManager::new( library.root() );
        Self {
            library,
            manager,
            engine,
            sink,
            scope,
            state: PlaybackState::Stopped,
            stop_reason: StopReason::default(),
            stop_pending: false,
            stop_origin: 0,
            pending: None,
            position: 0,
            current: None,
            now_playing: false,
            shuffle: false,
            repeat: RepeatMode::Off,
            selected_row: None,
            scope_held: false,
        }
    }


    /// Sets the initial shuffle and repeat modes.
    pub fn with_modes( mut self, shuffle: bool, repeat: RepeatMode ) -> Self {
        self.shuffle = shuffle;
        self.repeat = repeat;
        self
    }


    // ---- Commands -------------------------------------------------------


    /// Plays every album in the library.
    pub fn play_all( &mut self ) {
        if self.library.is_empty() {
            self.alert( "The library has no playable albums." );
            return;
        }
        if self.state.is_active() {
            self.request_stop( StopReason::PlayAllRequested );
            return;
        }
        self.start_request( &PlayRequest::All );
    }


    /// Plays an album, a filtered selection or a single track from the library.
    pub fn play( &mut self, request: PlayRequest ) {
        if !self.state.is_active() {
            self.start_request( &request );
            return;
        }
        if self.stop_outstanding( StopReason::TrackRequested ) {
            return;
        }
        match self.library.resolve( &request ) {
            Ok(( playlists, ordinal )) => {
                self.pending = Some( PendingStart::Fresh { playlists, ordinal } );
                self.request_stop( StopReason::TrackRequested );
            }
            Err( e ) => self.alert( format!( "Cannot play that: {}", e ) ),
        }
    }


    /// Plays the row `ordinal` (1-based) of the current sequence.
    pub fn play_track( &mut self, ordinal: usize ) {
        if !self.manager.is_loaded() || ordinal == 0 || ordinal > self.manager.track_count() {
            tracing::debug!( "Ignoring play of track {}", ordinal );
            return;
        }

        if self.state.is_active() {
            if self.stop_outstanding( StopReason::PlayingTrackRequested ) {
                return;
            }
            self.pending = Some( PendingStart::Jump { ordinal } );
            self.request_stop( StopReason::PlayingTrackRequested );
            return;
        }

        // Engine is idle: no stop round trip needed
        if self.manager.jump_to( ordinal ).is_some() && self.begin_session() {
            self.start_next_track();
        }
    }


    pub fn stop( &mut self ) {
        if self.state.is_active() {
            self.request_stop( StopReason::StopRequested );
        }
    }


    pub fn previous( &mut self ) {
        if self.state.is_active() && self.manager.has_previous( self.position ) {
            self.request_stop( StopReason::PreviousRequested );
        }
    }


    pub fn next( &mut self ) {
        if !self.state.is_active() {
            return;
        }
        let reason = if self.manager.has_next( self.position ) {
            StopReason::NextRequested
        } else {
            StopReason::EndOfAudio
        };
        self.request_stop( reason );
    }


    pub fn restart( &mut self ) {
        if self.state.is_active() {
            self.request_stop( StopReason::RestartRequested );
        }
    }


    pub fn reshuffle( &mut self ) {
        if self.state.is_active() {
            self.request_stop( StopReason::ReshuffleRequested );
        }
    }


    pub fn pause( &mut self ) {
        if self.state == PlaybackState::Playing {
            self.engine.pause();
        }
    }


    pub fn resume( &mut self ) {
        if self.state == PlaybackState::Paused {
            self.engine.resume();
        }
    }


    pub fn toggle_pause( &mut self ) {
        match self.state {
            PlaybackState::Playing => self.engine.pause(),
            PlaybackState::Paused => self.engine.resume(),
            PlaybackState::Stopped => self.play_all(),
        }
    }


    /// Seeks within the rendering track; `fraction` is clamped to `0.0..=1.0`.
    pub fn seek( &mut self, fraction: f64 ) {
        if self.state.is_active() && self.current.is_some() {
            self.engine.seek( fraction.clamp( 0.0, 1.0 ) );
        }
    }


    /// Switches shuffle without interrupting the rendering track.
    pub fn set_shuffle( &mut self, shuffle: bool ) {
        if shuffle == self.shuffle {
            return;
        }
        self.shuffle = shuffle;
        tracing::info!( "Shuffle: {}", if shuffle { "on" } else { "off" } );

        if !self.manager.is_loaded() {
            self.publish_now_playing();
            return;
        }

        let pinned = self.pinned_track();

        if self.state.is_active() {
            let ordinal = self.manager.on_shuffle_mode_changed( shuffle );
            self.position = ordinal;
            self.current = ordinal.checked_sub( 1 ).and_then( |i| self.manager.track_at( i ) );
        } else {
            self.manager.reset_with_shuffle( shuffle );
        }

        self.repin( pinned );
        self.publish_track_list();
        self.publish_now_playing();

        if self.state.is_active() && self.repeat != RepeatMode::One {
            self.engine.clear_queue();
            self.enqueue_lookahead();
        }
    }


    pub fn toggle_shuffle( &mut self ) {
        self.set_shuffle( !self.shuffle );
    }


    /// Changes repeat mode, re-queueing the lookahead when it changes meaning.
    pub fn set_repeat( &mut self, repeat: RepeatMode ) {
        let previous = mem::replace( &mut self.repeat, repeat );
        if previous == repeat {
            return;
        }
        tracing::info!( "Repeat: {:?}", repeat );

        let lookahead_changed = previous == RepeatMode::One || repeat == RepeatMode::One;
        if lookahead_changed && self.state.is_active() && self.current.is_some() {
            self.engine.clear_queue();
            self.enqueue_lookahead();
        }
        self.publish_now_playing();
    }


    pub fn cycle_repeat( &mut self ) {
        self.set_repeat( self.repeat.cycle() );
    }


    /// Records the row the view has highlighted.
    pub fn select( &mut self, row: Option<usize> ) {
        self.selected_row = row;
    }


    /// Re-publishes the active ordering.
    pub fn show_track_list( &mut self ) {
        self.publish_track_list();
    }


    /// Publishes details of the track at `row` in the current sequence.
    pub fn inspect( &mut self, row: usize ) {
        if let Some( track ) = self.manager.track_at( row ) {
            self.sink.publish( SelectionUpdate::TrackDetails( track ) );
        }
    }


    /// Lists the library one level below `path` (`[type[, artist[, album]]]`).
    pub fn browse( &mut self, path: &[String] ) {
        let entries: Result<Vec<String>, LibraryError> = match path {
            [] => Ok( self.library.types().map( str::to_string ).collect() ),
            [ kind ] => self.library.artists( kind ).map( |names| names.map( str::to_string ).collect() ),
            [ kind, artist ] => self.library.albums( kind, artist ).map( |names| names.map( str::to_string ).collect() ),
            [ kind, artist, album ] => self.library
                .album( &AlbumKey::new( kind, artist, album ) )
                .map( |album| album.tracks.clone() ),
            _ => Err( LibraryError::InvalidKey( path.join( "/" ) ) ),
        };

        match entries {
            Ok( entries ) => {
                let path = path.join( "/" );
                self.sink.publish( SelectionUpdate::Listing { path, entries } );
            }
            Err( e ) => self.alert( format!( "Cannot browse: {}", e ) ),
        }
    }


    /// Publishes the elapsed time of the rendering track.
    pub fn poll_progress( &mut self ) {
        if self.state != PlaybackState::Playing {
            return;
        }
        if let Some( progress ) = self.engine.progress() {
            self.sink.publish( SelectionUpdate::Progress( progress ) );
        }
    }


    /// Stops the engine and releases the session before exit.
    pub fn shutdown( &mut self ) {
        if self.state.is_active() {
            self.stop_reason = StopReason::StopRequested;
            self.engine.stop();
        }
        self.end_session();
    }


    // ---- Engine events --------------------------------------------------


    pub fn handle_event( &mut self, event: EngineEvent ) {
        tracing::debug!( "Engine event: {:?}", event );
        match event {
            EngineEvent::NowPlayingChanged => self.on_now_playing_changed(),
            EngineEvent::StateChanged( state ) => self.on_state_changed( state ),
            EngineEvent::Error( description ) => self.on_engine_error( description ),
        }
    }


    fn on_state_changed( &mut self, state: PlaybackState ) {
        let previous = mem::replace( &mut self.state, state );

        match state {
            PlaybackState::Stopped => {
                if previous == PlaybackState::Stopped {
                    tracing::debug!( "Engine already stopped, ignoring" );
                    return;
                }
                self.stop_pending = false;
                let reason = mem::take( &mut self.stop_reason );
                self.on_stopped( reason );
            }
            PlaybackState::Playing | PlaybackState::Paused => self.publish_now_playing(),
        }
    }


    fn on_stopped( &mut self, reason: StopReason ) {
        tracing::debug!( "Stopped ({:?}) at track {}", reason, self.position );

        match reason {
            StopReason::PlaybackError | StopReason::StopRequested => self.end_session(),
            StopReason::EndOfAudio => {
                if self.repeat == RepeatMode::All && self.manager.is_loaded() {
                    self.manager.reset();
                    self.publish_track_list();
                    self.start_next_track();
                } else {
                    self.end_session();
                }
            }
            StopReason::PlayAllRequested => {
                self.pending = None;
                self.start_request( &PlayRequest::All );
            }
            StopReason::TrackRequested => match self.pending.take() {
                Some( PendingStart::Fresh { playlists, ordinal } ) => self.start_fresh( playlists, ordinal ),
                other => {
                    tracing::warn!( "Track requested without a target: {:?}", other );
                    self.end_session();
                }
            },
            StopReason::PlayingTrackRequested => match self.pending.take() {
                Some( PendingStart::Jump { ordinal } ) => self.jump_and_start( ordinal ),
                other => {
                    tracing::warn!( "Playing track requested without a target: {:?}", other );
                    self.end_session();
                }
            },
            // Relative to the track shown when asked; a gapless change may
            // have moved `position` on since.
            StopReason::PreviousRequested => {
                self.position = self.stop_origin.saturating_sub( 2 );
                self.jump_and_start( self.position + 1 );
            }
            StopReason::NextRequested => {
                self.position = self.stop_origin;
                if self.position + 1 > self.manager.track_count() {
                    self.position = 0;
                }
                self.jump_and_start( self.position + 1 );
            }
            StopReason::RestartRequested => {
                self.manager.reset();
                self.start_next_track();
            }
            StopReason::ReshuffleRequested => {
                let pinned = self.pinned_track();
                self.shuffle = true;
                self.manager.reset_with_shuffle( true );
                self.repin( pinned );
                self.publish_track_list();
                self.start_next_track();
            }
        }
    }


    fn on_now_playing_changed( &mut self ) {
        if self.repeat == RepeatMode::One && self.now_playing && self.current.is_some() {
            tracing::debug!( "Repeating track {}", self.position );
        } else {
            let Some( track ) = self.manager.advance() else {
                tracing::warn!( "Engine started a track past the end of the sequence" );
                return;
            };
            self.now_playing = true;
            self.position += 1;
            debug_assert_eq!( track.ordinal(), self.position, "session position out of step with sequence" );
            if track.ordinal() != self.position {
                tracing::warn!( "Position {} out of step with track {}", self.position, track.ordinal() );
                self.position = track.ordinal();
            }
            tracing::info!( "Now playing {}/{}: {}", self.position, self.manager.track_count(), track.title() );
            self.current = Some( track );
        }

        self.publish_now_playing();
        self.enqueue_lookahead();
    }


    fn on_engine_error( &mut self, description: String ) {
        tracing::error!( "Audio engine error: {}", description );
        self.alert( format!( "Playback failed. {}", LOG_HINT ) );

        if !self.state.is_active() {
            // Failed before it started rendering; no stop will follow
            self.end_session();
            return;
        }
        if !self.stop_pending {
            self.pending = None;
            self.request_stop( StopReason::PlaybackError );
        }
    }


    // ---- Helpers --------------------------------------------------------


    /// Returns true (and logs) when a stop is already on its way.
    fn stop_outstanding( &self, wanted: StopReason ) -> bool {
        if self.stop_pending {
            tracing::debug!( "Stop already requested ({:?}), ignoring {:?}", self.stop_reason, wanted );
        }
        self.stop_pending
    }


    fn request_stop( &mut self, reason: StopReason ) {
        if self.stop_outstanding( reason ) {
            return;
        }
        tracing::debug!( "Requesting stop: {:?}", reason );
        self.stop_reason = reason;
        self.stop_pending = true;
        self.stop_origin = self.position;
        self.engine.stop();
    }


    fn start_request( &mut self, request: &PlayRequest ) {
        match self.library.resolve( request ) {
            Ok(( playlists, ordinal )) => self.start_fresh( playlists, ordinal ),
            Err( e ) => {
                self.alert( format!( "Cannot play that: {}", e ) );
                self.end_session();
            }
        }
    }


    fn start_fresh( &mut self, playlists: Vec<Playlist>, ordinal: usize ) {
        if let Err( e ) = self.manager.load( playlists, ordinal, self.shuffle ) {
            tracing::warn!( "Could not load sequence: {}", e );
            self.alert( format!( "Cannot play that: {}", e ) );
            self.end_session();
            return;
        }
        if !self.begin_session() {
            return;
        }
        self.selected_row = None;
        self.publish_track_list();
        self.start_next_track();
    }


    fn jump_and_start( &mut self, ordinal: usize ) {
        if self.manager.jump_to( ordinal ).is_some() {
            self.start_next_track();
        } else {
            tracing::warn!( "No track {} to start", ordinal );
            self.end_session();
        }
    }


    /// Starts the track under the manager cursor.
    ///
    /// Position is set one short of the track's ordinal; the now-playing
    /// event brings both counters onto it together.
    fn start_next_track( &mut self ) {
        debug_assert!( !self.stop_pending, "play issued while a stop is outstanding" );

        let Some( track ) = self.manager.peek_next() else {
            tracing::warn!( "Nothing left to start" );
            self.end_session();
            return;
        };

        self.position = track.ordinal() - 1;
        self.now_playing = false;

        tracing::info!( "Starting track {}: {:?}", track.ordinal(), track.url() );
        if let Err( e ) = self.engine.play( track.url() ) {
            self.report_transport_error( "play", track.url(), &e );
            self.end_session();
        }
    }


    fn enqueue_lookahead( &mut self ) {
        let lookahead = if self.repeat == RepeatMode::One {
            self.current.clone()
        } else {
            self.manager.peek_next()
        };

        if let Some( track ) = lookahead {
            match self.engine.enqueue( track.url() ) {
                Ok(()) => tracing::debug!( "Queued track {}: {:?}", track.ordinal(), track.url() ),
                Err( e ) => self.report_transport_error( "queue", track.url(), &e ),
            }
        }
    }


    fn begin_session( &mut self ) -> bool {
        if self.scope_held {
            return true;
        }
        match self.scope.acquire() {
            Ok(()) => {
                self.scope_held = true;
                tracing::info!( "Session started" );
                true
            }
            Err( e ) => {
                tracing::error!( "Could not access library at {:?}: {}", self.library.root(), e );
                self.alert( format!( "Cannot access the music library. {}", LOG_HINT ) );
                false
            }
        }
    }


    fn end_session( &mut self ) {
        self.position = 0;
        self.current = None;
        self.now_playing = false;
        self.pending = None;

        if self.scope_held {
            self.scope.release();
            self.scope_held = false;
            tracing::info!( "Session ended" );
        }
        self.publish_now_playing();
    }


    fn pinned_track( &self ) -> Option<TrackInfo> {
        self.selected_row.and_then( |row| self.manager.track_at( row ) )
    }


    /// Moves the highlighted row onto `pinned` in the current ordering.
    fn repin( &mut self, pinned: Option<TrackInfo> ) {
        if let Some( track ) = pinned {
            self.selected_row = self.manager.index_for( &track );
            if self.selected_row.is_none() {
                tracing::warn!( "Selected track {:?} vanished from the sequence", track.url() );
            }
        }
    }


    fn report_transport_error( &mut self, action: &str, url: &Path, error: &EngineError ) {
        tracing::error!( "Failed to {} {:?}: {}", action, url, error );
        if url.exists() {
            tracing::error!( "{:?} exists but could not be decoded", url );
        } else {
            tracing::error!( "{:?} is missing", url );
        }

        let name = url.file_name().map( |n| n.to_string_lossy() ).unwrap_or_default();
        self.alert( format!( "Could not {} \"{}\". {}", action, name, LOG_HINT ) );
    }


    fn alert( &mut self, message: impl Into<String> ) {
        self.sink.publish( SelectionUpdate::Alert( message.into() ) );
    }


    fn publish_now_playing( &mut self ) {
        let update = NowPlaying {
            track: self.current.clone(),
            position: self.position,
            total: self.manager.track_count(),
            state: self.state,
            seek_enabled: self.state.is_active() && self.current.is_some(),
            shuffle: self.shuffle,
            repeat: self.repeat,
        };
        self.sink.publish( SelectionUpdate::NowPlaying( update ) );
    }


    fn publish_track_list( &mut self ) {
        let names = self.manager.track_names();
        self.sink.publish( SelectionUpdate::TrackList { names, selected: self.selected_row } );
    }


    // ---- Accessors ------------------------------------------------------


    pub fn state( &self ) -> PlaybackState {
        self.state
    }


    pub fn position( &self ) -> usize {
        self.position
    }


    pub fn current_track( &self ) -> Option<&TrackInfo> {
        self.current.as_ref()
    }


    pub fn stop_reason( &self ) -> StopReason {
        self.stop_reason
    }


    pub fn shuffle( &self ) -> bool {
        self.shuffle
    }


    pub fn repeat( &self ) -> RepeatMode {
        self.repeat
    }


    pub fn selected_row( &self ) -> Option<usize> {
        self.selected_row
    }


    pub fn manager( &self ) -> &PlaylistManager {
        &self.manager
    }


    pub fn library( &self ) -> &Library {
        &self.library
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io;
    use std::path::PathBuf;
    use std::sync::atomic::{ AtomicUsize, Ordering };
    use std::sync::{ Arc, Mutex };

    use crate::engine::Progress;
    use crate::library::{ Album, AlbumKey };


    #[derive( Debug, Clone, PartialEq )]
    enum Call {
        Play( PathBuf ),
        Enqueue( PathBuf ),
        Pause,
        Resume,
        Stop,
        ClearQueue,
        Seek( f64 ),
    }


    #[derive( Clone, Default )]
    struct MockEngine {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_play: bool,
        fail_enqueue: bool,
    }


    impl AudioEngine for MockEngine {
        fn play( &mut self, url: &Path ) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push( Call::Play( url.to_path_buf() ) );
            if self.fail_play {
                return Err( EngineError::FileOpen( "missing".into() ) );
            }
            Ok(())
        }


        fn enqueue( &mut self, url: &Path ) -> Result<(), EngineError> {
            self.calls.lock().unwrap().push( Call::Enqueue( url.to_path_buf() ) );
            if self.fail_enqueue {
                return Err( EngineError::Decode( "unsupported".into() ) );
            }
            Ok(())
        }


        fn pause( &mut self ) {
            self.calls.lock().unwrap().push( Call::Pause );
        }


        fn resume( &mut self ) {
            self.calls.lock().unwrap().push( Call::Resume );
        }


        fn stop( &mut self ) {
            self.calls.lock().unwrap().push( Call::Stop );
        }


        fn clear_queue( &mut self ) {
            self.calls.lock().unwrap().push( Call::ClearQueue );
        }


        fn seek( &mut self, fraction: f64 ) {
            self.calls.lock().unwrap().push( Call::Seek( fraction ) );
        }


        fn progress( &self ) -> Option<Progress> {
            None
        }
    }


    #[derive( Clone, Default )]
    struct CountingScope {
        acquired: Arc<AtomicUsize>,
        released: Arc<AtomicUsize>,
    }


    impl AccessScope for CountingScope {
        fn acquire( &mut self ) -> io::Result<()> {
            self.acquired.fetch_add( 1, Ordering::SeqCst );
            Ok(())
        }


        fn release( &mut self ) {
            self.released.fetch_add( 1, Ordering::SeqCst );
        }
    }


    struct Harness {
        controller: PlaybackController,
        calls: Arc<Mutex<Vec<Call>>>,
        updates: Arc<Mutex<Vec<SelectionUpdate>>>,
        scope: CountingScope,
    }


    impl Harness {
        fn new( albums: &[( &str, usize )] ) -> Self {
            Self::with_engine( albums, MockEngine::default() )
        }


        fn with_engine( albums: &[( &str, usize )], engine: MockEngine ) -> Self {
            let mut library = Library::new( "/music" );
            for ( name, count ) in albums {
                let tracks = ( 1..=*count ).map( |i| format!( "{}-{}.mp3", name, i ) ).collect();
                library.insert( AlbumKey::new( "Rock", "Band", *name ), Album {
                    playlist_file: format!( "{}.m3u", name ),
                    tracks,
                    audio_files: *count,
                });
            }

            let calls = Arc::clone( &engine.calls );
            let updates = Arc::new( Mutex::new( Vec::new() ) );
            let sink_updates = Arc::clone( &updates );
            let scope = CountingScope::default();

            let controller = PlaybackController::new(
                library,
                Box::new( engine ),
                Box::new( move |update| sink_updates.lock().unwrap().push( update ) ),
                Box::new( scope.clone() ),
            );

            Self { controller, calls, updates, scope }
        }


        fn url( album: &str, track: usize ) -> PathBuf {
            PathBuf::from( format!( "/music/Rock/Band/{}/{}-{}.mp3", album, album, track ) )
        }


        fn take_calls( &self ) -> Vec<Call> {
            mem::take( &mut *self.calls.lock().unwrap() )
        }


        fn alerts( &self ) -> Vec<String> {
            self.updates.lock().unwrap().iter()
                .filter_map( |u| match u {
                    SelectionUpdate::Alert( message ) => Some( message.clone() ),
                    _ => None,
                })
                .collect()
        }


        fn last_selected( &self ) -> Option<Option<usize>> {
            self.updates.lock().unwrap().iter().rev()
                .find_map( |u| match u {
                    SelectionUpdate::TrackList { selected, .. } => Some( *selected ),
                    _ => None,
                })
        }


        /// Engine confirms the requested track started rendering.
        fn engine_started( &mut self ) {
            self.controller.handle_event( EngineEvent::StateChanged( PlaybackState::Playing ) );
            self.controller.handle_event( EngineEvent::NowPlayingChanged );
        }


        fn engine_stopped( &mut self ) {
            self.controller.handle_event( EngineEvent::StateChanged( PlaybackState::Stopped ) );
        }


        fn released( &self ) -> usize {
            self.scope.released.load( Ordering::SeqCst )
        }


        fn acquired( &self ) -> usize {
            self.scope.acquired.load( Ordering::SeqCst )
        }
    }


    #[test]
    fn test_play_all_starts_first_track_and_queues_second() {
        let mut h = Harness::new( &[ ( "A", 2 ), ( "B", 1 ) ] );
        h.controller.play_all();
        assert_eq!( h.take_calls(), vec![ Call::Play( Harness::url( "A", 1 ) ) ] );
        assert_eq!( h.acquired(), 1 );

        h.engine_started();
        assert_eq!( h.controller.position(), 1 );
        assert_eq!( h.take_calls(), vec![ Call::Enqueue( Harness::url( "A", 2 ) ) ] );
    }


    #[test]
    fn test_gapless_transition_advances_once() {
        let mut h = Harness::new( &[ ( "A", 2 ), ( "B", 1 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 2 );
        assert_eq!( h.controller.current_track().unwrap().file_name(), "A-2.mp3" );
        assert_eq!( h.take_calls(), vec![ Call::Enqueue( Harness::url( "B", 1 ) ) ] );

        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 3 );
        assert!( h.take_calls().is_empty() );
    }


    #[test]
    fn test_play_all_walks_every_album_in_order() {
        let mut h = Harness::new( &[ ( "A", 2 ), ( "B", 1 ), ( "C", 3 ) ] );
        h.controller.play_all();
        assert_eq!( h.controller.manager().track_count(), 6 );
        h.engine_started();

        let expected = [ ( "A", 1 ), ( "A", 2 ), ( "B", 1 ), ( "C", 1 ), ( "C", 2 ), ( "C", 3 ) ];
        for ( i, ( album, track ) ) in expected.iter().enumerate() {
            if i > 0 {
                h.controller.handle_event( EngineEvent::NowPlayingChanged );
            }
            let current = h.controller.current_track().unwrap();
            assert_eq!( current.ordinal(), i + 1 );
            assert_eq!( current.url(), Harness::url( album, *track ).as_path() );
            assert_eq!( h.controller.position(), i + 1 );
        }

        let enqueued: Vec<Call> = h.take_calls().into_iter()
            .filter( |c| matches!( c, Call::Enqueue( _ ) ) )
            .collect();
        assert_eq!( enqueued.len(), 5 );
        assert_eq!( enqueued.last(), Some( &Call::Enqueue( Harness::url( "C", 3 ) ) ) );

        h.engine_stopped();
        assert_eq!( h.controller.position(), 0 );
        assert_eq!( h.released(), 1 );
    }


    #[test]
    fn test_next_waits_for_stop() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.next();
        assert_eq!( h.take_calls(), vec![ Call::Stop ] );
        assert_eq!( h.controller.stop_reason(), StopReason::NextRequested );

        h.engine_stopped();
        assert_eq!( h.controller.stop_reason(), StopReason::EndOfAudio );
        assert_eq!( h.take_calls(), vec![ Call::Play( Harness::url( "A", 2 ) ) ] );

        h.engine_started();
        assert_eq!( h.controller.position(), 2 );
        assert_eq!( h.take_calls(), vec![ Call::Enqueue( Harness::url( "A", 3 ) ) ] );
    }


    #[test]
    fn test_next_on_last_track_ends_session() {
        let mut h = Harness::new( &[ ( "A", 1 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.next();
        assert_eq!( h.controller.stop_reason(), StopReason::EndOfAudio );
        h.engine_stopped();

        assert!( h.take_calls().iter().all( |c| *c == Call::Stop ) );
        assert_eq!( h.controller.position(), 0 );
        assert!( h.controller.current_track().is_none() );
        assert_eq!( h.released(), 1 );
    }


    #[test]
    fn test_previous_ignored_on_first_track() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.previous();
        assert!( h.take_calls().is_empty() );
    }


    #[test]
    fn test_next_counts_from_track_shown_when_asked() {
        let mut h = Harness::new( &[ ( "A", 4 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.next();
        // Gapless change already in flight when the stop was requested
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 2 );
        h.engine_stopped();

        assert_eq!( h.take_calls(), vec![
            Call::Stop,
            Call::Enqueue( Harness::url( "A", 3 ) ),
            Call::Play( Harness::url( "A", 2 ) ),
        ]);
        h.engine_started();
        assert_eq!( h.controller.position(), 2 );
    }


    #[test]
    fn test_previous_counts_from_track_shown_when_asked() {
        let mut h = Harness::new( &[ ( "A", 4 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        h.take_calls();

        h.controller.previous();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 3 );
        h.engine_stopped();

        assert_eq!( h.take_calls().last(), Some( &Call::Play( Harness::url( "A", 1 ) ) ) );
        h.engine_started();
        assert_eq!( h.controller.position(), 1 );
    }


    #[test]
    fn test_previous_steps_back_one() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 3 );
        h.take_calls();

        h.controller.previous();
        h.engine_stopped();
        assert_eq!( h.take_calls(), vec![ Call::Stop, Call::Play( Harness::url( "A", 2 ) ) ] );

        h.engine_started();
        assert_eq!( h.controller.position(), 2 );
    }


    #[test]
    fn test_second_stop_request_is_ignored() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.next();
        h.controller.stop();
        assert_eq!( h.take_calls(), vec![ Call::Stop ] );
        assert_eq!( h.controller.stop_reason(), StopReason::NextRequested );
    }


    #[test]
    fn test_stop_ends_session_once() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.play_all();
        h.engine_started();

        h.controller.stop();
        h.engine_stopped();
        h.engine_stopped();

        assert_eq!( h.acquired(), 1 );
        assert_eq!( h.released(), 1 );
        assert_eq!( h.controller.state(), PlaybackState::Stopped );
    }


    #[test]
    fn test_repeat_track_requeues_same_track() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.set_repeat( RepeatMode::One );
        assert_eq!( h.take_calls(), vec![ Call::ClearQueue, Call::Enqueue( Harness::url( "A", 1 ) ) ] );

        // Engine moves on to the queued copy of the same file
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), 1 );
        assert_eq!( h.controller.manager().peek_next().unwrap().ordinal(), 2 );
        assert_eq!( h.take_calls(), vec![ Call::Enqueue( Harness::url( "A", 1 ) ) ] );

        h.controller.set_repeat( RepeatMode::All );
        assert_eq!( h.take_calls(), vec![ Call::ClearQueue, Call::Enqueue( Harness::url( "A", 2 ) ) ] );

        h.controller.set_repeat( RepeatMode::Off );
        assert!( h.take_calls().is_empty() );
    }


    #[test]
    fn test_repeat_all_restarts_at_end() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.set_repeat( RepeatMode::All );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        h.take_calls();

        // Queue ran dry
        h.engine_stopped();
        assert_eq!( h.take_calls(), vec![ Call::Play( Harness::url( "A", 1 ) ) ] );
        assert_eq!( h.released(), 0 );

        h.engine_started();
        assert_eq!( h.controller.position(), 1 );
    }


    #[test]
    fn test_restart_plays_first_track() {
        let mut h = Harness::new( &[ ( "A", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        h.take_calls();

        h.controller.restart();
        h.engine_stopped();
        assert_eq!( h.take_calls(), vec![ Call::Stop, Call::Play( Harness::url( "A", 1 ) ) ] );
    }


    #[test]
    fn test_reshuffle_keeps_selection_on_same_track() {
        let mut h = Harness::new( &[ ( "A", 4 ), ( "B", 6 ) ] );
        h.controller.set_shuffle( true );
        h.controller.play_all();
        h.engine_started();
        for _ in 0..3 {
            h.controller.handle_event( EngineEvent::NowPlayingChanged );
        }
        assert_eq!( h.controller.position(), 4 );

        h.controller.select( Some( 3 ) );
        let captured = h.controller.manager().track_at( 3 ).unwrap();

        h.controller.reshuffle();
        assert_eq!( h.controller.stop_reason(), StopReason::ReshuffleRequested );
        h.engine_stopped();

        let row = h.controller.selected_row().expect( "selection lost after reshuffle" );
        assert!( h.controller.manager().track_at( row ).unwrap().same_track( &captured ) );
        assert_eq!( h.last_selected(), Some( Some( row ) ) );
        assert!( h.controller.shuffle() );
        assert_eq!( h.controller.manager().peek_next().unwrap().ordinal(), 1 );
    }


    #[test]
    fn test_toggle_shuffle_keeps_current_track() {
        let mut h = Harness::new( &[ ( "A", 3 ), ( "B", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        let playing = h.controller.current_track().unwrap().clone();
        h.take_calls();

        h.controller.set_shuffle( true );
        let position = h.controller.position();
        let relocated = h.controller.manager().track_at( position - 1 ).unwrap();
        assert!( relocated.same_track( &playing ) );

        let calls = h.take_calls();
        assert_eq!( calls.first(), Some( &Call::ClearQueue ) );
        if let Some( next ) = h.controller.manager().peek_next() {
            assert_eq!( calls.get( 1 ), Some( &Call::Enqueue( next.url().to_path_buf() ) ) );
        }

        h.controller.set_shuffle( false );
        assert_eq!( h.controller.position(), 2 );
    }


    #[test]
    fn test_toggle_shuffle_with_repeat_one_keeps_queue() {
        let mut h = Harness::new( &[ ( "A", 3 ), ( "B", 3 ) ] );
        h.controller.set_repeat( RepeatMode::One );
        h.controller.play_all();
        h.engine_started();
        let playing = h.controller.current_track().unwrap().clone();
        assert_eq!( h.take_calls(), vec![
            Call::Play( Harness::url( "A", 1 ) ),
            Call::Enqueue( Harness::url( "A", 1 ) ),
        ]);

        h.controller.toggle_shuffle();
        assert!( h.take_calls().is_empty() );

        let position = h.controller.position();
        let relocated = h.controller.manager().track_at( position - 1 ).unwrap();
        assert!( relocated.same_track( &playing ) );
        assert!( h.controller.current_track().unwrap().same_track( &playing ) );

        // Still repeating the same file
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        assert_eq!( h.controller.position(), position );
        assert_eq!( h.take_calls(), vec![ Call::Enqueue( Harness::url( "A", 1 ) ) ] );
    }


    #[test]
    fn test_click_in_now_playing_list_while_playing() {
        let mut h = Harness::new( &[ ( "A", 5 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.play_track( 4 );
        assert_eq!( h.controller.stop_reason(), StopReason::PlayingTrackRequested );
        h.engine_stopped();
        assert_eq!( h.take_calls(), vec![ Call::Stop, Call::Play( Harness::url( "A", 4 ) ) ] );

        h.engine_started();
        assert_eq!( h.controller.position(), 4 );
    }


    #[test]
    fn test_click_while_stopped_starts_immediately() {
        let mut h = Harness::new( &[ ( "A", 5 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.stop();
        h.engine_stopped();
        h.take_calls();

        h.controller.play_track( 3 );
        assert_eq!( h.take_calls(), vec![ Call::Play( Harness::url( "A", 3 ) ) ] );
        assert_eq!( h.acquired(), 2 );
    }


    #[test]
    fn test_play_album_while_playing_waits_for_stop() {
        let mut h = Harness::new( &[ ( "A", 2 ), ( "B", 3 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        let key = AlbumKey::new( "Rock", "Band", "B" );
        h.controller.play( PlayRequest::Album { key, ordinal: 2 } );
        assert_eq!( h.controller.stop_reason(), StopReason::TrackRequested );
        h.engine_stopped();

        assert_eq!( h.take_calls(), vec![ Call::Stop, Call::Play( Harness::url( "B", 2 ) ) ] );
        assert_eq!( h.controller.manager().track_count(), 3 );
        assert_eq!( h.acquired(), 1 );
    }


    #[test]
    fn test_play_all_while_playing_restarts_session() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.controller.handle_event( EngineEvent::NowPlayingChanged );
        h.take_calls();

        h.controller.play_all();
        assert_eq!( h.controller.stop_reason(), StopReason::PlayAllRequested );
        h.engine_stopped();
        assert_eq!( h.take_calls(), vec![ Call::Stop, Call::Play( Harness::url( "A", 1 ) ) ] );
    }


    #[test]
    fn test_play_failure_aborts_session() {
        let engine = MockEngine { fail_play: true, ..MockEngine::default() };
        let mut h = Harness::with_engine( &[ ( "A", 2 ) ], engine );
        h.controller.play_all();

        assert_eq!( h.acquired(), 1 );
        assert_eq!( h.released(), 1 );
        assert_eq!( h.controller.position(), 0 );
        let alerts = h.alerts();
        assert_eq!( alerts.len(), 1 );
        assert!( alerts[ 0 ].contains( "A-1.mp3" ) );
        assert!( alerts[ 0 ].contains( LOG_HINT ) );
    }


    #[test]
    fn test_enqueue_failure_keeps_playing() {
        let engine = MockEngine { fail_enqueue: true, ..MockEngine::default() };
        let mut h = Harness::with_engine( &[ ( "A", 2 ) ], engine );
        h.controller.play_all();
        h.engine_started();

        assert_eq!( h.alerts().len(), 1 );
        assert!( !h.take_calls().contains( &Call::Stop ) );
        assert_eq!( h.controller.state(), PlaybackState::Playing );
    }


    #[test]
    fn test_engine_error_stops_and_ends_session() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.handle_event( EngineEvent::Error( "device lost".into() ) );
        assert_eq!( h.take_calls(), vec![ Call::Stop ] );
        assert_eq!( h.controller.stop_reason(), StopReason::PlaybackError );

        h.engine_stopped();
        assert_eq!( h.released(), 1 );
        assert!( h.controller.current_track().is_none() );
        assert_eq!( h.alerts().len(), 1 );
    }


    #[test]
    fn test_async_start_failure_ends_session_once() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.play_all();
        assert_eq!( h.take_calls(), vec![ Call::Play( Harness::url( "A", 1 ) ) ] );

        // The render thread fails to start the track it accepted
        h.controller.handle_event( EngineEvent::Error( "decode failed".into() ) );
        assert_eq!( h.released(), 1 );
        assert_eq!( h.controller.position(), 0 );

        h.engine_stopped();
        assert_eq!( h.released(), 1 );
        assert_eq!( h.alerts().len(), 1 );
        assert_eq!( h.controller.position(), 0 );
        assert_eq!( h.controller.stop_reason(), StopReason::EndOfAudio );
        assert!( h.take_calls().is_empty() );
    }


    #[test]
    fn test_transport_commands_need_active_engine() {
        let mut h = Harness::new( &[ ( "A", 2 ) ] );
        h.controller.next();
        h.controller.previous();
        h.controller.stop();
        h.controller.pause();
        h.controller.seek( 0.5 );
        assert!( h.take_calls().is_empty() );

        h.controller.play_all();
        h.engine_started();
        h.take_calls();

        h.controller.seek( 1.5 );
        h.controller.pause();
        h.controller.handle_event( EngineEvent::StateChanged( PlaybackState::Paused ) );
        h.controller.toggle_pause();
        assert_eq!( h.take_calls(), vec![ Call::Seek( 1.0 ), Call::Pause, Call::Resume ] );
    }


    #[test]
    fn test_browse_walks_type_artist_album() {
        let mut h = Harness::new( &[ ( "A", 2 ), ( "B", 1 ) ] );
        let listing = |h: &Harness| h.updates.lock().unwrap().iter().rev()
            .find_map( |u| match u {
                SelectionUpdate::Listing { path, entries } => Some(( path.clone(), entries.clone() )),
                _ => None,
            });

        h.controller.browse( &[] );
        assert_eq!( listing( &h ), Some(( String::new(), vec![ "Rock".to_string() ] )) );

        h.controller.browse( &[ "Rock".to_string() ] );
        assert_eq!( listing( &h ), Some(( "Rock".to_string(), vec![ "Band".to_string() ] )) );

        h.controller.browse( &[ "Rock".to_string(), "Band".to_string() ] );
        assert_eq!( listing( &h ).unwrap().1, vec![ "A".to_string(), "B".to_string() ] );

        h.controller.browse( &[ "Rock".to_string(), "Band".to_string(), "A".to_string() ] );
        assert_eq!( listing( &h ).unwrap().1, vec![ "A-1.mp3".to_string(), "A-2.mp3".to_string() ] );

        h.controller.browse( &[ "Jazz".to_string() ] );
        assert_eq!( h.alerts().len(), 1 );
        assert!( h.take_calls().is_empty() );
    }


    #[test]
    fn test_empty_library_alerts() {
        let mut h = Harness::new( &[] );
        h.controller.play_all();
        assert!( h.take_calls().is_empty() );
        assert_eq!( h.alerts().len(), 1 );
        assert_eq!( h.acquired(), 0 );
    }
}
