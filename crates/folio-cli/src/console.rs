//! Console rendering of controller updates.

use std::io::{ self, Write };
use std::path::PathBuf;
use std::time::Duration;

use folio_core::{ NowPlaying, PlaybackState, Progress, RepeatMode, SelectionSink, SelectionUpdate, TrackInfo };


/// Prints controller updates to stdout, alerts to stderr.
pub struct ConsoleView {
    /// Log file named in alerts, when logging to a file.
    log_file: Option<PathBuf>,
    /// Last whole second printed for the progress line.
    last_second: Option<u64>,
}


impl ConsoleView {
    pub fn new( log_file: Option<PathBuf> ) -> Self {
        Self { log_file, last_second: None }
    }


    /// Formats one update; `None` when there is nothing new to show.
    fn render( &mut self, update: &SelectionUpdate ) -> Option<String> {
        match update {
            SelectionUpdate::NowPlaying( now ) => {
                self.last_second = None;
                Some( format_now_playing( now ) )
            }
            SelectionUpdate::TrackList { names, selected } => Some( format_track_list( names, *selected ) ),
            SelectionUpdate::Progress( progress ) => {
                let second = progress.elapsed.as_secs();
                if self.last_second == Some( second ) {
                    return None;
                }
                self.last_second = Some( second );
                Some( format_progress( progress ) )
            }
            SelectionUpdate::TrackDetails( track ) => Some( format_details( track ) ),
            SelectionUpdate::Listing { path, entries } => Some( format_listing( path, entries ) ),
            SelectionUpdate::Alert( message ) => Some( match &self.log_file {
                Some( path ) => format!( "! {} (log: {})", message, path.display() ),
                None => format!( "! {}", message ),
            }),
        }
    }
}


impl SelectionSink for ConsoleView {
    fn publish( &mut self, update: SelectionUpdate ) {
        let Some( text ) = self.render( &update ) else { return };

        let result = match update {
            SelectionUpdate::Alert( _ ) => writeln!( io::stderr(), "{}", text ),
            SelectionUpdate::Progress( _ ) => {
                let mut out = io::stdout();
                write!( out, "\r{}", text ).and_then( |_| out.flush() )
            }
            _ => writeln!( io::stdout(), "\r{}", text ),
        };
        if let Err( e ) = result {
            tracing::debug!( "Console write failed: {}", e );
        }
    }
}


fn format_time( duration: Duration ) -> String {
    let secs = duration.as_secs();
    format!( "{}:{:02}", secs / 60, secs % 60 )
}


fn format_now_playing( now: &NowPlaying ) -> String {
    let mut flags = Vec::new();
    if now.shuffle {
        flags.push( "shuffle" );
    }
    match now.repeat {
        RepeatMode::Off => {}
        RepeatMode::One => flags.push( "repeat one" ),
        RepeatMode::All => flags.push( "repeat all" ),
    }
    let flags = if flags.is_empty() { String::new() } else { format!( "  [{}]", flags.join( ", " ) ) };

    match ( &now.track, now.state ) {
        ( Some( track ), state ) => {
            let icon = if state == PlaybackState::Paused { "⏸" } else { "▶" };
            format!(
                "{} {}/{}  {}  ({}){}",
                icon,
                now.position,
                now.total,
                track.title(),
                track.playlist().album_name(),
                flags
            )
        }
        ( None, PlaybackState::Stopped ) => format!( "■ Stopped{}", flags ),
        ( None, _ ) => format!( "… Starting{}", flags ),
    }
}


fn format_track_list( names: &[String], selected: Option<usize> ) -> String {
    names.iter()
        .enumerate()
        .map( |( i, name )| {
            let marker = if selected == Some( i ) { '>' } else { ' ' };
            format!( "{} {:>3}. {}", marker, i + 1, name )
        })
        .collect::<Vec<_>>()
        .join( "\n" )
}


fn format_progress( progress: &Progress ) -> String {
    match progress.duration {
        Some( total ) => format!(
            "  {} / {}  ({:.0}%)",
            format_time( progress.elapsed ),
            format_time( total ),
            progress.fraction().unwrap_or( 0.0 ) * 100.0
        ),
        None => format!( "  {}", format_time( progress.elapsed ) ),
    }
}


fn format_listing( path: &str, entries: &[String] ) -> String {
    let heading = if path.is_empty() { "Library" } else { path };
    if entries.is_empty() {
        return format!( "{}: (empty)", heading );
    }

    let mut lines = vec![ format!( "{}:", heading ) ];
    lines.extend( entries.iter().map( |entry| format!( "  {}", entry ) ) );
    lines.join( "\n" )
}


fn format_details( track: &TrackInfo ) -> String {
    format!(
        "Track {}: {}\n  album:    {}\n  playlist: {}\n  file:     {}",
        track.ordinal(),
        track.title(),
        track.playlist().relative_path.display(),
        track.playlist().source_file,
        track.url().display()
    )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_track_list_marks_selection() {
        let names = vec![ "Intro".to_string(), "Theme".to_string() ];
        assert_eq!( format_track_list( &names, Some( 1 ) ), "    1. Intro\n>   2. Theme" );
    }


    #[test]
    fn test_listing_under_heading() {
        let entries = vec![ "Debut".to_string(), "Vol 2".to_string() ];
        assert_eq!( format_listing( "Rock/Band", &entries ), "Rock/Band:\n  Debut\n  Vol 2" );
        assert_eq!( format_listing( "", &[] ), "Library: (empty)" );
    }


    #[test]
    fn test_idle_now_playing_shows_modes() {
        let now = NowPlaying {
            track: None,
            position: 0,
            total: 0,
            state: PlaybackState::Stopped,
            seek_enabled: false,
            shuffle: true,
            repeat: RepeatMode::All,
        };
        assert_eq!( format_now_playing( &now ), "■ Stopped  [shuffle, repeat all]" );
    }


    #[test]
    fn test_progress_printed_once_per_second() {
        let mut view = ConsoleView::new( None );
        let tick = |ms| SelectionUpdate::Progress( Progress {
            elapsed: Duration::from_millis( ms ),
            duration: Some( Duration::from_secs( 200 ) ),
        });

        assert_eq!( view.render( &tick( 60_000 ) ).as_deref(), Some( "  1:00 / 3:20  (30%)" ) );
        assert_eq!( view.render( &tick( 60_200 ) ), None );
        assert!( view.render( &tick( 61_000 ) ).is_some() );
    }


    #[test]
    fn test_alert_names_log_file() {
        let mut view = ConsoleView::new( Some( PathBuf::from( "/tmp/folio.log" ) ) );
        let text = view.render( &SelectionUpdate::Alert( "Playback failed.".into() ) ).unwrap();
        assert_eq!( text, "! Playback failed. (log: /tmp/folio.log)" );
    }
}
