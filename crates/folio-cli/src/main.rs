//! Folio CLI - console album player

mod cli;
mod console;
mod scope;
mod settings;

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{ Context, Result };
use clap::Parser;
use tokio::io::{ AsyncBufReadExt, BufReader };
use tokio::sync::mpsc::{ self, UnboundedSender };
use tracing_subscriber::{ layer::SubscriberExt, util::SubscriberInitExt, EnvFilter };

use folio_core::{
    command::{ self, Command },
    runtime::{ self, RuntimeConfig },
    LibraryScanner, PlaybackController, Renderer,
};

use cli::Args;
use console::ConsoleView;
use scope::LibraryScope;
use settings::Settings;


/// Installs the log subscriber: stderr by default, or `log_file`.
fn init_logging( log_file: Option<&Path> ) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else( |_| "folio=info,folio_core=info".into() );

    match log_file {
        Some( path ) => {
            let file = File::create( path )
                .with_context( || format!( "Failed to create log file {:?}", path ) )?;
            tracing_subscriber::registry()
                .with( filter )
                .with( tracing_subscriber::fmt::layer().with_ansi( false ).with_writer( Mutex::new( file ) ) )
                .init();
        }
        None => {
            tracing_subscriber::registry()
                .with( filter )
                .with( tracing_subscriber::fmt::layer().with_writer( std::io::stderr ) )
                .init();
        }
    }
    Ok(())
}


/// Forwards `command` to the controller; false once the controller is gone.
fn forward( commands: &UnboundedSender<Command>, command: Command ) -> bool {
    match commands.send( command ) {
        Ok(()) => true,
        Err( e ) => {
            tracing::warn!( "Controller is gone, dropping {:?}", e.0 );
            false
        }
    }
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging( args.log_file.as_deref() )?;

    let mut settings = Settings::load();
    settings.apply_args( &args );

    let root = settings.root.clone()
        .or_else( dirs::audio_dir )
        .context( "No library root configured; pass --root <dir>" )?;
    let library = LibraryScanner::scan( &root )
        .with_context( || format!( "Failed to scan library {:?}", root ) )?;
    tracing::info!( "Library {:?}: {} albums", root, library.album_keys().count() );

    let ( event_tx, event_rx ) = mpsc::unbounded_channel();
    let ( command_tx, command_rx ) = mpsc::unbounded_channel();

    let controller = PlaybackController::new(
        library,
        Box::new( Renderer::new( event_tx ) ),
        Box::new( ConsoleView::new( args.log_file.clone() ) ),
        Box::new( LibraryScope::new( &root ) ),
    )
    .with_modes( settings.shuffle, settings.repeat.into() );

    let runtime = tokio::spawn( runtime::run( controller, event_rx, command_rx, RuntimeConfig::default() ) );

    println!( "folio: library at {}. Type 'help' for commands.", root.display() );
    if args.play {
        forward( &command_tx, Command::PlayAll );
    }

    let mut lines = BufReader::new( tokio::io::stdin() ).lines();
    while let Some( line ) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        match Command::parse( &line ) {
            Ok( Command::Help ) => println!( "{}", command::help_text() ),
            Ok( command ) => {
                let quit = matches!( command, Command::Quit );
                if !forward( &command_tx, command ) || quit {
                    break;
                }
            }
            Err( e ) => eprintln!( "{}", e ),
        }
    }

    drop( command_tx );
    let controller = runtime.await.context( "Controller task failed" )?;

    settings.root = Some( root );
    settings.shuffle = controller.shuffle();
    settings.repeat = controller.repeat().into();
    settings.save();

    Ok(())
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_forward_reports_closed_controller() {
        let ( tx, mut rx ) = mpsc::unbounded_channel();
        assert!( forward( &tx, Command::PlayAll ) );
        assert_eq!( rx.try_recv().unwrap(), Command::PlayAll );

        drop( rx );
        assert!( !forward( &tx, Command::Next ) );
    }
}
