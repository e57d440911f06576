//! Command-line argument parsing for Folio.

use std::path::PathBuf;

use clap::Parser;

use crate::settings::RepeatSetting;


/// Folio - an album playlist player for the terminal.
#[derive( Parser, Debug )]
#[command( name = "folio" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Library root holding Type/Artist/Album folders.
    #[arg( short, long )]
    pub root: Option<PathBuf>,

    /// Shuffle on or off (remembered for next time).
    #[arg( long, value_name = "on|off", value_parser = parse_switch )]
    pub shuffle: Option<bool>,

    /// Repeat mode (remembered for next time).
    #[arg( long, value_enum )]
    pub repeat: Option<RepeatSetting>,

    /// Write the log to this file instead of stderr.
    #[arg( long )]
    pub log_file: Option<PathBuf>,

    /// Start playing the whole library immediately.
    #[arg( short, long )]
    pub play: bool,
}


fn parse_switch( s: &str ) -> Result<bool, String> {
    match s.to_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok( true ),
        "off" | "false" | "no" | "0" => Ok( false ),
        _ => Err( format!( "expected on or off, got '{}'", s ) ),
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let args = Args::parse_from( [ "folio" ] );
        assert!( args.root.is_none() );
        assert!( args.shuffle.is_none() );
        assert!( !args.play );
    }


    #[test]
    fn test_switches() {
        let args = Args::parse_from( [ "folio", "--shuffle", "on", "--repeat", "one", "-p" ] );
        assert_eq!( args.shuffle, Some( true ) );
        assert_eq!( args.repeat, Some( RepeatSetting::One ) );
        assert!( args.play );

        assert!( Args::try_parse_from( [ "folio", "--shuffle", "sideways" ] ).is_err() );
    }
}
