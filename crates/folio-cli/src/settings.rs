//! Application settings management
//!
//! Persists the library root and the shuffle/repeat modes between runs.

use std::fs;
use std::path::{ Path, PathBuf };

use clap::ValueEnum;
use serde::{ Deserialize, Serialize };

use folio_core::RepeatMode;

use crate::cli::Args;


/// Repeat mode as stored on disk and accepted on the command line.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum )]
#[serde( rename_all = "lowercase" )]
pub enum RepeatSetting {
    #[default]
    Off,
    One,
    All,
}


impl From<RepeatSetting> for RepeatMode {
    fn from( setting: RepeatSetting ) -> Self {
        match setting {
            RepeatSetting::Off => RepeatMode::Off,
            RepeatSetting::One => RepeatMode::One,
            RepeatSetting::All => RepeatMode::All,
        }
    }
}


impl From<RepeatMode> for RepeatSetting {
    fn from( mode: RepeatMode ) -> Self {
        match mode {
            RepeatMode::Off => RepeatSetting::Off,
            RepeatMode::One => RepeatSetting::One,
            RepeatMode::All => RepeatSetting::All,
        }
    }
}


/// Application settings.
#[derive( Debug, Clone, Default, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Library root (`Type/Artist/Album` folders)
    pub root: Option<PathBuf>,

    pub shuffle: bool,

    pub repeat: RepeatSetting,
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "folio" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        Self::settings_path()
            .map( |path| Self::load_from( &path ) )
            .unwrap_or_default()
    }


    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => serde_json::from_str( &contents ).unwrap_or_else( |e| {
                tracing::warn!( "Ignoring malformed settings {:?}: {}", path, e );
                Self::default()
            }),
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Saves settings to disk.
    pub fn save( &self ) {
        if let Some( path ) = Self::settings_path() {
            self.save_to( &path );
        }
    }


    pub fn save_to( &self, path: &Path ) {
        if let Some( parent ) = path.parent() {
            if let Err( e ) = fs::create_dir_all( parent ) {
                tracing::warn!( "Failed to create settings directory: {}", e );
                return;
            }
        }

        match serde_json::to_string_pretty( self ) {
            Ok( json ) => {
                if let Err( e ) = fs::write( path, json ) {
                    tracing::warn!( "Failed to save settings: {}", e );
                }
            }
            Err( e ) => {
                tracing::warn!( "Failed to serialize settings: {}", e );
            }
        }
    }


    /// Command-line arguments override stored values.
    pub fn apply_args( &mut self, args: &Args ) {
        if let Some( root ) = &args.root {
            self.root = Some( root.clone() );
        }
        if let Some( shuffle ) = args.shuffle {
            self.shuffle = shuffle;
        }
        if let Some( repeat ) = args.repeat {
            self.repeat = repeat;
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use clap::Parser;


    #[test]
    fn test_missing_or_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        assert_eq!( Settings::load_from( &path ), Settings::default() );

        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_saved_modes_survive_restart() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "nested" ).join( "settings.json" );
        let settings = Settings { root: Some( "/music".into() ), shuffle: true, repeat: RepeatSetting::All };
        settings.save_to( &path );

        let contents = fs::read_to_string( &path ).unwrap();
        assert!( contents.contains( "\"repeat\": \"all\"" ) );
        assert_eq!( Settings::load_from( &path ), settings );
    }


    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "shuffle": true }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert!( settings.shuffle );
        assert_eq!( settings.repeat, RepeatSetting::Off );
        assert_eq!( settings.root, None );
    }


    #[test]
    fn test_args_override_settings() {
        let mut settings = Settings { root: Some( "/old".into() ), shuffle: true, repeat: RepeatSetting::One };
        let args = Args::parse_from( [ "folio", "--root", "/new", "--repeat", "all" ] );
        settings.apply_args( &args );

        assert_eq!( settings.root, Some( PathBuf::from( "/new" ) ) );
        assert!( settings.shuffle );
        assert_eq!( settings.repeat, RepeatSetting::All );
    }
}
