//! Controller event loop
//!
//! The controller is owned by one task. Engine events, console commands
//! and timer ticks are all funnelled into it here, so its state never needs
//! a lock.

use std::future::Future;
use std::time::Duration;

use tokio::sync::mpsc::{ self, UnboundedReceiver };
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::command::Command;
use crate::controller::PlaybackController;
use crate::engine::{ EngineEvent, PlaybackState };


/// Timings used by the event loop.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub struct RuntimeConfig {
    /// How often elapsed time is published while playing.
    pub poll_interval: Duration,
    /// Delay before an `info` request is answered; a newer request replaces it.
    pub inspect_delay: Duration,
}


impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis( 200 ),
            inspect_delay: Duration::from_secs( 1 ),
        }
    }
}


/// Runs at most one delayed action; scheduling another cancels the first.
#[derive( Debug, Default )]
pub struct Debouncer {
    pending: Option<JoinHandle<()>>,
}


impl Debouncer {
    pub fn schedule<F>( &mut self, delay: Duration, action: F )
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.cancel();
        self.pending = Some( tokio::spawn( async move {
            tokio::time::sleep( delay ).await;
            action.await;
        }));
    }


    pub fn cancel( &mut self ) {
        if let Some( handle ) = self.pending.take() {
            handle.abort();
        }
    }
}


impl Drop for Debouncer {
    fn drop( &mut self ) {
        self.cancel();
    }
}


/// Applies one console command to the controller.
///
/// `Info` is answered immediately here; [`run`] debounces it instead.
pub fn apply( controller: &mut PlaybackController, command: Command ) {
    match command {
        Command::PlayAll => controller.play_all(),
        ref session @ ( Command::Album { .. } | Command::Find { .. } | Command::Single { .. } ) => {
            if let Some( request ) = session.play_request() {
                controller.play( request );
            }
        }
        Command::Play { ordinal } => controller.play_track( ordinal ),
        Command::Pause => controller.pause(),
        Command::Resume => controller.resume(),
        Command::Toggle => controller.toggle_pause(),
        Command::Stop => controller.stop(),
        Command::Next => controller.next(),
        Command::Prev => controller.previous(),
        Command::Restart => controller.restart(),
        Command::Reshuffle => controller.reshuffle(),
        Command::Shuffle { enabled: Some( enabled ) } => controller.set_shuffle( enabled ),
        Command::Shuffle { enabled: None } => controller.toggle_shuffle(),
        Command::Repeat { mode: Some( mode ) } => controller.set_repeat( mode ),
        Command::Repeat { mode: None } => controller.cycle_repeat(),
        Command::Seek { fraction } => controller.seek( fraction ),
        Command::Select { row } => controller.select( row.checked_sub( 1 ) ),
        Command::Info { row } => {
            if let Some( index ) = row.checked_sub( 1 ) {
                controller.inspect( index );
            }
        }
        Command::Browse { path } => controller.browse( &path ),
        Command::List => controller.show_track_list(),
        // Handled by the console / the loop
        Command::Help | Command::Quit => {}
    }
}


/// Drives `controller` until `Quit` arrives or the command channel closes.
///
/// Returns the controller after shutting it down so the caller can read the
/// final modes.
pub async fn run(
    mut controller: PlaybackController,
    mut events: UnboundedReceiver<EngineEvent>,
    mut commands: UnboundedReceiver<Command>,
    config: RuntimeConfig,
) -> PlaybackController {
    let mut ticker = tokio::time::interval( config.poll_interval );
    ticker.set_missed_tick_behavior( MissedTickBehavior::Skip );

    let ( inspect_tx, mut inspect_rx ) = mpsc::unbounded_channel::<usize>();
    let mut debouncer = Debouncer::default();

    tracing::debug!( "Controller loop started: {:?}", config );

    loop {
        tokio::select! {
            biased;

            Some( event ) = events.recv() => controller.handle_event( event ),

            command = commands.recv() => match command {
                None | Some( Command::Quit ) => break,
                Some( Command::Info { row } ) => {
                    let Some( index ) = row.checked_sub( 1 ) else { continue };
                    let tx = inspect_tx.clone();
                    debouncer.schedule( config.inspect_delay, async move {
                        let _ = tx.send( index );
                    });
                }
                Some( command ) => apply( &mut controller, command ),
            },

            Some( index ) = inspect_rx.recv() => controller.inspect( index ),

            _ = ticker.tick(), if controller.state() == PlaybackState::Playing => {
                controller.poll_progress();
            }
        }
    }

    debouncer.cancel();
    controller.shutdown();
    tracing::debug!( "Controller loop finished" );
    controller
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::path::Path;
    use std::sync::{ Arc, Mutex };

    use crate::engine::{ AudioEngine, EngineError, Progress };
    use crate::library::{ Album, AlbumKey, Library };
    use crate::selection::SelectionUpdate;
    use crate::session::OpenAccess;


    /// Engine that only records the files it was asked to play.
    #[derive( Clone, Default )]
    struct RecordingEngine {
        played: Arc<Mutex<Vec<String>>>,
    }


    impl AudioEngine for RecordingEngine {
        fn play( &mut self, url: &Path ) -> Result<(), EngineError> {
            let name = url.file_name().map( |n| n.to_string_lossy().into_owned() ).unwrap_or_default();
            self.played.lock().unwrap().push( name );
            Ok(())
        }

        fn enqueue( &mut self, _url: &Path ) -> Result<(), EngineError> {
            Ok(())
        }

        fn pause( &mut self ) {}

        fn resume( &mut self ) {}

        fn stop( &mut self ) {}

        fn clear_queue( &mut self ) {}

        fn seek( &mut self, _fraction: f64 ) {}

        fn progress( &self ) -> Option<Progress> {
            Some( Progress { elapsed: Duration::from_secs( 1 ), duration: None } )
        }
    }


    fn controller() -> ( PlaybackController, RecordingEngine, Arc<Mutex<Vec<SelectionUpdate>>> ) {
        let mut library = Library::new( "/music" );
        library.insert( AlbumKey::new( "Jazz", "Trio", "Blue" ), Album {
            playlist_file: "Blue.m3u".into(),
            tracks: vec![ "01 Intro.flac".into(), "02 Theme.flac".into(), "03 Coda.flac".into() ],
            audio_files: 3,
        });

        let engine = RecordingEngine::default();
        let updates = Arc::new( Mutex::new( Vec::new() ) );
        let sink = Arc::clone( &updates );
        let controller = PlaybackController::new(
            library,
            Box::new( engine.clone() ),
            Box::new( move |update| sink.lock().unwrap().push( update ) ),
            Box::new( OpenAccess ),
        );
        ( controller, engine, updates )
    }


    fn details( updates: &Arc<Mutex<Vec<SelectionUpdate>>> ) -> Vec<usize> {
        updates.lock().unwrap().iter()
            .filter_map( |u| match u {
                SelectionUpdate::TrackDetails( track ) => Some( track.ordinal() ),
                _ => None,
            })
            .collect()
    }


    #[test]
    fn test_apply_converts_rows() {
        let ( mut controller, engine, _ ) = controller();
        apply( &mut controller, Command::Find { term: "theme".into() } );
        assert_eq!( *engine.played.lock().unwrap(), vec![ "02 Theme.flac".to_string() ] );

        apply( &mut controller, Command::Select { row: 1 } );
        assert_eq!( controller.selected_row(), Some( 0 ) );
    }


    #[test]
    fn test_apply_browse_lists_library() {
        let ( mut controller, engine, updates ) = controller();
        apply( &mut controller, Command::parse( "browse Jazz/Trio" ).unwrap() );
        apply( &mut controller, Command::parse( "browse Jazz/Trio/Blue" ).unwrap() );

        let listings: Vec<_> = updates.lock().unwrap().iter()
            .filter_map( |u| match u {
                SelectionUpdate::Listing { path, entries } => Some(( path.clone(), entries.len() )),
                _ => None,
            })
            .collect();
        assert_eq!( listings, vec![ ( "Jazz/Trio".to_string(), 1 ), ( "Jazz/Trio/Blue".to_string(), 3 ) ] );
        assert!( engine.played.lock().unwrap().is_empty() );
    }


    #[tokio::test]
    async fn test_quit_returns_controller() {
        let ( controller, engine, _ ) = controller();
        let ( _events_tx, events_rx ) = mpsc::unbounded_channel();
        let ( commands_tx, commands_rx ) = mpsc::unbounded_channel();

        commands_tx.send( Command::PlayAll ).unwrap();
        commands_tx.send( Command::Shuffle { enabled: Some( true ) } ).unwrap();
        commands_tx.send( Command::Quit ).unwrap();

        let controller = run( controller, events_rx, commands_rx, RuntimeConfig::default() ).await;
        assert!( controller.shuffle() );
        assert_eq!( *engine.played.lock().unwrap(), vec![ "01 Intro.flac".to_string() ] );
    }


    #[tokio::test]
    async fn test_engine_events_reach_controller() {
        let ( controller, _engine, updates ) = controller();
        let ( events_tx, events_rx ) = mpsc::unbounded_channel();
        let ( commands_tx, commands_rx ) = mpsc::unbounded_channel();
        let config = RuntimeConfig { poll_interval: Duration::from_millis( 10 ), ..RuntimeConfig::default() };
        let handle = tokio::spawn( run( controller, events_rx, commands_rx, config ) );

        commands_tx.send( Command::PlayAll ).unwrap();
        tokio::time::sleep( Duration::from_millis( 20 ) ).await;
        events_tx.send( EngineEvent::StateChanged( PlaybackState::Playing ) ).unwrap();
        events_tx.send( EngineEvent::NowPlayingChanged ).unwrap();
        tokio::time::sleep( Duration::from_millis( 60 ) ).await;
        commands_tx.send( Command::Quit ).unwrap();

        let controller = handle.await.unwrap();
        assert_eq!( controller.state(), PlaybackState::Playing );
        let progress = updates.lock().unwrap().iter()
            .filter( |u| matches!( u, SelectionUpdate::Progress( _ ) ) )
            .count();
        assert!( progress > 0 );
    }


    #[tokio::test]
    async fn test_inspect_is_debounced() {
        let ( controller, _engine, updates ) = controller();
        let ( _events_tx, events_rx ) = mpsc::unbounded_channel();
        let ( commands_tx, commands_rx ) = mpsc::unbounded_channel();
        let config = RuntimeConfig { inspect_delay: Duration::from_millis( 30 ), ..RuntimeConfig::default() };
        let handle = tokio::spawn( run( controller, events_rx, commands_rx, config ) );

        commands_tx.send( Command::PlayAll ).unwrap();
        commands_tx.send( Command::Info { row: 1 } ).unwrap();
        commands_tx.send( Command::Info { row: 3 } ).unwrap();
        tokio::time::sleep( Duration::from_millis( 150 ) ).await;
        commands_tx.send( Command::Quit ).unwrap();
        handle.await.unwrap();

        assert_eq!( details( &updates ), vec![ 3 ] );
    }


    #[tokio::test]
    async fn test_debouncer_cancel() {
        let fired = Arc::new( Mutex::new( false ) );
        let flag = Arc::clone( &fired );
        let mut debouncer = Debouncer::default();
        debouncer.schedule( Duration::from_millis( 20 ), async move {
            *flag.lock().unwrap() = true;
        });
        debouncer.cancel();

        tokio::time::sleep( Duration::from_millis( 60 ) ).await;
        assert!( !*fired.lock().unwrap() );
    }
}
