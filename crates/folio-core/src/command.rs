//! Console command parsing.
//!
//! Commands are typed one per line. Row numbers are 1-based as shown to
//! the user; conversion to list indices happens when they are applied.

use thiserror::Error;

use crate::library::{ AlbumKey, PlayRequest };
use crate::playlist::RepeatMode;


/// Errors that can occur during command parsing.
#[derive( Debug, Error, PartialEq )]
pub enum CommandError {
    #[error( "Unknown command: {0}" )]
    Unknown( String ),

    #[error( "Invalid argument: {0}" )]
    InvalidArgument( String ),

    #[error( "Missing argument: {0}" )]
    MissingArgument( String ),
}


/// Parsed console command.
#[derive( Debug, Clone, PartialEq )]
pub enum Command {
    // Session commands
    PlayAll,
    Album { key: AlbumKey, ordinal: usize },
    Find { term: String },
    Single { key: AlbumKey, ordinal: usize },
    Play { ordinal: usize },

    // Transport commands
    Pause,
    Resume,
    Toggle,
    Stop,
    Next,
    Prev,
    Restart,
    Reshuffle,
    Shuffle { enabled: Option<bool> },
    Repeat { mode: Option<RepeatMode> },
    Seek { fraction: f64 },

    // View commands
    /// Library listing below `path` (type, artist, album segments).
    Browse { path: Vec<String> },
    Select { row: usize },
    Info { row: usize },
    List,
    Help,
    Quit,
}


impl Command {
    /// Parses one line of console input.
    pub fn parse( input: &str ) -> Result<Self, CommandError> {
        let input = input.trim();
        let mut parts = input.splitn( 2, ' ' );
        let cmd = parts.next().unwrap_or( "" ).to_lowercase();
        let args = parts.next().map( |s| s.trim() ).filter( |s| !s.is_empty() );

        match cmd.as_str() {
            // Session commands
            "all" | "playall" => Ok( Command::PlayAll ),
            "album" | "al" => {
                let args = args
                    .ok_or_else( || CommandError::MissingArgument( "type/artist/album".into() ) )?;
                let ( key, ordinal ) = split_key( args )?;
                Ok( Command::Album { key, ordinal: ordinal.map( parse_row ).transpose()?.unwrap_or( 1 ) } )
            }
            "find" | "search" | "?" => {
                let term = args
                    .ok_or_else( || CommandError::MissingArgument( "search term".into() ) )?;
                Ok( Command::Find { term: term.to_string() } )
            }
            "single" | "one" => {
                let args = args
                    .ok_or_else( || CommandError::MissingArgument( "type/artist/album".into() ) )?;
                let ( key, ordinal ) = split_key( args )?;
                let ordinal = ordinal
                    .ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                Ok( Command::Single { key, ordinal: parse_row( ordinal )? } )
            }
            "play" | "p" => {
                let row = args
                    .ok_or_else( || CommandError::MissingArgument( "track number".into() ) )?;
                Ok( Command::Play { ordinal: parse_row( row )? } )
            }

            // Transport commands
            "pause" | "pa" => Ok( Command::Pause ),
            "resume" | "re" => Ok( Command::Resume ),
            "toggle" | "t" | "space" => Ok( Command::Toggle ),
            "stop" | "st" => Ok( Command::Stop ),
            "next" | "n" => Ok( Command::Next ),
            "prev" | "previous" | "pr" => Ok( Command::Prev ),
            "restart" | "rs" => Ok( Command::Restart ),
            "reshuffle" | "rsh" => Ok( Command::Reshuffle ),
            "shuffle" | "sh" => {
                let enabled = args.map( parse_switch ).transpose()?;
                Ok( Command::Shuffle { enabled } )
            }
            "repeat" | "rep" => {
                let mode = args.map( parse_repeat ).transpose()?;
                Ok( Command::Repeat { mode } )
            }
            "seek" | "sk" => {
                let percent = args
                    .ok_or_else( || CommandError::MissingArgument( "percent".into() ) )?;
                Ok( Command::Seek { fraction: parse_percent( percent )? } )
            }

            // View commands
            "browse" | "b" | "lib" => Ok( Command::Browse { path: parse_path( args )? } ),
            "select" | "sel" => {
                let row = args
                    .ok_or_else( || CommandError::MissingArgument( "row".into() ) )?;
                Ok( Command::Select { row: parse_row( row )? } )
            }
            "info" | "i" => {
                let row = args
                    .ok_or_else( || CommandError::MissingArgument( "row".into() ) )?;
                Ok( Command::Info { row: parse_row( row )? } )
            }
            "list" | "ls" => Ok( Command::List ),
            "help" | "h" => Ok( Command::Help ),
            "quit" | "q" | "exit" => Ok( Command::Quit ),

            "" => Err( CommandError::Unknown( "empty command".into() ) ),
            other => Err( CommandError::Unknown( other.to_string() ) ),
        }
    }


    /// The library request a session command starts, if any.
    pub fn play_request( &self ) -> Option<PlayRequest> {
        match self {
            Command::PlayAll => Some( PlayRequest::All ),
            Command::Album { key, ordinal } => Some( PlayRequest::Album { key: key.clone(), ordinal: *ordinal } ),
            Command::Find { term } => Some( PlayRequest::Filtered { term: term.clone() } ),
            Command::Single { key, ordinal } => Some( PlayRequest::Track { key: key.clone(), ordinal: *ordinal } ),
            _ => None,
        }
    }
}


/// Splits `type/artist/album [#n]`; album names may contain spaces and digits.
fn split_key( args: &str ) -> Result<( AlbumKey, Option<&str> ), CommandError> {
    let ( key, ordinal ) = match args.rsplit_once( '#' ) {
        Some(( key, last )) if is_number( last.trim() ) => ( key.trim(), Some( last.trim() ) ),
        _ => ( args, None ),
    };

    let key = key.parse::<AlbumKey>()
        .map_err( |e| CommandError::InvalidArgument( e.to_string() ) )?;
    Ok(( key, ordinal ))
}


fn is_number( s: &str ) -> bool {
    !s.is_empty() && s.chars().all( |c| c.is_ascii_digit() )
}


/// Splits `[type[/artist[/album]]]` into its segments.
fn parse_path( args: Option<&str> ) -> Result<Vec<String>, CommandError> {
    let Some( args ) = args else { return Ok( Vec::new() ) };

    let path: Vec<String> = args.split( '/' ).map( |s| s.trim().to_string() ).collect();
    if path.len() > 3 || path.iter().any( String::is_empty ) {
        return Err( CommandError::InvalidArgument(
            format!( "Invalid library path: '{}'. Use type/artist/album", args )
        ));
    }
    Ok( path )
}


fn parse_row( s: &str ) -> Result<usize, CommandError> {
    match s.trim().parse::<usize>() {
        Ok( row ) if row > 0 => Ok( row ),
        _ => Err( CommandError::InvalidArgument( format!( "Invalid row: '{}'. Rows start at 1", s ) ) ),
    }
}


fn parse_switch( s: &str ) -> Result<bool, CommandError> {
    match s.to_lowercase().as_str() {
        "on" | "1" | "true" | "yes" => Ok( true ),
        "off" | "0" | "false" | "no" => Ok( false ),
        _ => Err( CommandError::InvalidArgument(
            format!( "Invalid switch: '{}'. Use 'on' or 'off'", s )
        )),
    }
}


fn parse_repeat( s: &str ) -> Result<RepeatMode, CommandError> {
    match s.to_lowercase().as_str() {
        "off" | "0" => Ok( RepeatMode::Off ),
        "one" | "1" | "track" => Ok( RepeatMode::One ),
        "all" | "2" => Ok( RepeatMode::All ),
        _ => Err( CommandError::InvalidArgument(
            format!( "Invalid repeat mode: '{}'. Use 'off', 'one', or 'all'", s )
        )),
    }
}


/// Parses "40" or "40%" into a fraction of the track.
fn parse_percent( s: &str ) -> Result<f64, CommandError> {
    let s = s.trim().trim_end_matches( '%' );
    let percent: f64 = s.parse()
        .map_err( |_| CommandError::InvalidArgument( format!( "Invalid percent: {}", s ) ) )?;

    if !( 0.0..=100.0 ).contains( &percent ) {
        return Err( CommandError::InvalidArgument( format!( "Percent out of range: {}", percent ) ) );
    }
    Ok( percent / 100.0 )
}


/// Returns help text listing all available commands.
pub fn help_text() -> &'static str {
    r#"Session Commands:
  all                       Play every album
  album <t/a/al> [#n]       Play an album, starting at track n
  find <term>               Play tracks whose name contains term
  single <t/a/al> #n        Play track n of an album on its own
  play <n>                  Play row n of the current list

Playback Commands:
  pause / resume / toggle   Pause or resume
  stop                      Stop playback
  next / prev               Next or previous track
  restart                   Restart from the first track
  reshuffle                 Shuffle again and restart
  shuffle [on|off]          Set or toggle shuffle
  repeat [off|one|all]      Set or cycle repeat mode
  seek <percent>            Seek within the track (e.g. 40)

Other Commands:
  browse [t[/a[/al]]]       List types, artists, albums or tracks
  select <n>                Highlight row n
  info <n>                  Show details of row n
  list                      Show the current list
  help                      Show this help
  quit                      Exit folio"#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_album() {
        let cmd = Command::parse( "album Rock/Band/Debut" ).unwrap();
        assert_eq!( cmd, Command::Album { key: AlbumKey::new( "Rock", "Band", "Debut" ), ordinal: 1 } );
    }


    #[test]
    fn test_parse_album_with_spaces_and_start() {
        let cmd = Command::parse( "al Rock/The Band/Live at Home #3" ).unwrap();
        assert_eq!( cmd, Command::Album { key: AlbumKey::new( "Rock", "The Band", "Live at Home" ), ordinal: 3 } );
    }


    #[test]
    fn test_parse_single_needs_track() {
        let result = Command::parse( "single Rock/Band/Debut" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );

        let cmd = Command::parse( "single Rock/Band/Debut #2" ).unwrap();
        assert_eq!(
            cmd.play_request(),
            Some( PlayRequest::Track { key: AlbumKey::new( "Rock", "Band", "Debut" ), ordinal: 2 } )
        );
    }


    #[test]
    fn test_album_name_may_end_in_a_number() {
        let cmd = Command::parse( "album Rock/Band/Vol 2" ).unwrap();
        assert_eq!( cmd, Command::Album { key: AlbumKey::new( "Rock", "Band", "Vol 2" ), ordinal: 1 } );

        let cmd = Command::parse( "single Rock/Band/Vol 2 # 4" ).unwrap();
        assert_eq!( cmd, Command::Single { key: AlbumKey::new( "Rock", "Band", "Vol 2" ), ordinal: 4 } );

        assert!( matches!( Command::parse( "album Rock/Band/Vol 2 #0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_parse_browse() {
        assert_eq!( Command::parse( "browse" ).unwrap(), Command::Browse { path: vec![] } );
        assert_eq!(
            Command::parse( "b Rock / The Band" ).unwrap(),
            Command::Browse { path: vec![ "Rock".to_string(), "The Band".to_string() ] }
        );
        assert!( Command::parse( "browse Rock//Debut" ).is_err() );
        assert!( Command::parse( "browse a/b/c/d" ).is_err() );
        assert_eq!( Command::parse( "browse Rock" ).unwrap().play_request(), None );
    }


    #[test]
    fn test_parse_seek_percent() {
        assert_eq!( Command::parse( "seek 40" ).unwrap(), Command::Seek { fraction: 0.4 } );
        assert_eq!( Command::parse( "sk 100%" ).unwrap(), Command::Seek { fraction: 1.0 } );
        assert!( Command::parse( "seek 140" ).is_err() );
    }


    #[test]
    fn test_parse_repeat_with_mode() {
        let cmd = Command::parse( "repeat all" ).unwrap();
        assert_eq!( cmd, Command::Repeat { mode: Some( RepeatMode::All ) } );
    }


    #[test]
    fn test_parse_repeat_cycle() {
        let cmd = Command::parse( "repeat" ).unwrap();
        assert_eq!( cmd, Command::Repeat { mode: None } );
    }


    #[test]
    fn test_parse_shuffle_switch() {
        assert_eq!( Command::parse( "shuffle on" ).unwrap(), Command::Shuffle { enabled: Some( true ) } );
        assert_eq!( Command::parse( "sh" ).unwrap(), Command::Shuffle { enabled: None } );
        assert!( Command::parse( "shuffle maybe" ).is_err() );
    }


    #[test]
    fn test_rows_start_at_one() {
        assert_eq!( Command::parse( "play 1" ).unwrap(), Command::Play { ordinal: 1 } );
        assert!( matches!( Command::parse( "play 0" ), Err( CommandError::InvalidArgument( _ ) ) ) );
        assert!( matches!( Command::parse( "info x" ), Err( CommandError::InvalidArgument( _ ) ) ) );
    }


    #[test]
    fn test_transport_commands_have_no_request() {
        assert_eq!( Command::parse( "next" ).unwrap().play_request(), None );
        assert_eq!( Command::parse( "all" ).unwrap().play_request(), Some( PlayRequest::All ) );
    }


    #[test]
    fn test_parse_unknown() {
        let result = Command::parse( "foobar" );
        assert!( matches!( result, Err( CommandError::Unknown( _ ) ) ) );
    }


    #[test]
    fn test_parse_missing_arg() {
        let result = Command::parse( "find" );
        assert!( matches!( result, Err( CommandError::MissingArgument( _ ) ) ) );
    }
}
