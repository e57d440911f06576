//! Playlist and track value types
//!
//! Plain data shared between the library index, the playlist manager
//! and the playback controller.

use std::path::{ Path, PathBuf };


/// Identifies one album's playlist file within the library.
#[derive( Debug, Clone, PartialEq, Eq, Hash )]
pub struct PlaylistInfo {
    /// File name of the album's `.m3u` playlist.
    pub source_file: String,
    /// Album folder relative to the library root (`Type/Artist/Album`).
    pub relative_path: PathBuf,
    /// Audio files counted in the folder at scan time. Informational only.
    pub declared_track_count: usize,
}


impl PlaylistInfo {
    pub fn new(
        source_file: impl Into<String>,
        relative_path: impl Into<PathBuf>,
        declared_track_count: usize,
    ) -> Self {
        Self {
            source_file: source_file.into(),
            relative_path: relative_path.into(),
            declared_track_count,
        }
    }


    /// Album folder name (last component of the relative path).
    pub fn album_name( &self ) -> String {
        self.relative_path
            .file_name()
            .map( |n| n.to_string_lossy().into_owned() )
            .unwrap_or_default()
    }
}


/// An album playlist with its track file names in m3u order.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Playlist {
    pub info: PlaylistInfo,
    pub track_file_names: Vec<String>,
}


impl Playlist {
    pub fn new( info: PlaylistInfo, track_file_names: Vec<String> ) -> Self {
        Self { info, track_file_names }
    }


    pub fn len( &self ) -> usize {
        self.track_file_names.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.track_file_names.is_empty()
    }
}


/// A resolved, playable track.
///
/// Only the playlist manager hands these out; `ordinal` is the 1-based
/// position in the sequence that was active when it was produced.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct TrackInfo {
    playlist: PlaylistInfo,
    file_name: String,
    ordinal: usize,
    url: PathBuf,
}


impl TrackInfo {
    pub(crate) fn resolve(
        root: &Path,
        playlist: &PlaylistInfo,
        file_name: &str,
        ordinal: usize,
    ) -> Self {
        Self {
            playlist: playlist.clone(),
            file_name: file_name.to_string(),
            ordinal,
            url: root.join( &playlist.relative_path ).join( file_name ),
        }
    }


    pub fn playlist( &self ) -> &PlaylistInfo {
        &self.playlist
    }


    pub fn file_name( &self ) -> &str {
        &self.file_name
    }


    pub fn ordinal( &self ) -> usize {
        self.ordinal
    }


    pub fn url( &self ) -> &Path {
        &self.url
    }


    /// True when both describe the same physical track, whatever ordering produced them.
    pub fn same_track( &self, other: &TrackInfo ) -> bool {
        self.playlist == other.playlist && self.file_name == other.file_name
    }


    /// Display name: the file name without its extension.
    pub fn title( &self ) -> &str {
        Path::new( &self.file_name )
            .file_stem()
            .and_then( |s| s.to_str() )
            .unwrap_or( &self.file_name )
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_resolve_joins_root_album_and_file() {
        let info = PlaylistInfo::new( "album.m3u", "Rock/Band/Album", 3 );
        let track = TrackInfo::resolve( Path::new( "/music" ), &info, "01 Intro.flac", 1 );

        assert_eq!( track.url(), Path::new( "/music/Rock/Band/Album/01 Intro.flac" ) );
        assert_eq!( track.title(), "01 Intro" );
        assert_eq!( info.album_name(), "Album" );
    }


    #[test]
    fn test_same_track_ignores_ordinal() {
        let info = PlaylistInfo::new( "a.m3u", "Jazz/X/Y", 2 );
        let a = TrackInfo::resolve( Path::new( "/m" ), &info, "one.mp3", 1 );
        let b = TrackInfo::resolve( Path::new( "/m" ), &info, "one.mp3", 7 );
        let other = PlaylistInfo::new( "b.m3u", "Jazz/X/Z", 2 );
        let c = TrackInfo::resolve( Path::new( "/m" ), &other, "one.mp3", 1 );

        assert!( a.same_track( &b ) );
        assert!( !a.same_track( &c ) );
    }
}
