//! Library scanning and lookup
//!
//! The library is a folder hierarchy `Type/Artist/Album/`, where each
//! album folder holds its audio files and an `.m3u` playlist giving
//! their play order.

use std::collections::BTreeMap;
use std::fmt;
use std::fs::{ self, File };
use std::io::{ BufRead, BufReader };
use std::path::{ Path, PathBuf };
use std::str::FromStr;

use thiserror::Error;

use crate::model::{ Playlist, PlaylistInfo };


/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "wma", "aiff", "alac",
];


/// Playlist file extensions.
const PLAYLIST_EXTENSIONS: &[&str] = &[ "m3u", "m3u8" ];


/// Errors that can occur during library operations.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Path not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Unknown type: {0}" )]
    UnknownType( String ),

    #[error( "Unknown artist: {0}" )]
    UnknownArtist( String ),

    #[error( "Unknown album: {0}" )]
    UnknownAlbum( String ),

    #[error( "Album {album} has no track {ordinal}" )]
    UnknownTrack { album: String, ordinal: usize },

    #[error( "Invalid album path: '{0}'. Use type/artist/album" )]
    InvalidKey( String ),

    #[error( "Nothing to play" )]
    Empty,
}


/// Address of one album in the library.
#[derive( Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord )]
pub struct AlbumKey {
    pub kind: String,
    pub artist: String,
    pub album: String,
}


impl AlbumKey {
    pub fn new( kind: impl Into<String>, artist: impl Into<String>, album: impl Into<String> ) -> Self {
        Self {
            kind: kind.into(),
            artist: artist.into(),
            album: album.into(),
        }
    }


    /// Folder of the album relative to the library root.
    pub fn relative_path( &self ) -> PathBuf {
        [ &self.kind, &self.artist, &self.album ].iter().collect()
    }
}


impl FromStr for AlbumKey {
    type Err = LibraryError;


    fn from_str( s: &str ) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().trim_matches( '/' ).split( '/' ).map( str::trim ).collect();
        match parts.as_slice() {
            [ kind, artist, album ] if !kind.is_empty() && !artist.is_empty() && !album.is_empty() => {
                Ok( AlbumKey::new( *kind, *artist, *album ) )
            }
            _ => Err( LibraryError::InvalidKey( s.to_string() ) ),
        }
    }
}


impl fmt::Display for AlbumKey {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "{}/{}/{}", self.kind, self.artist, self.album )
    }
}


/// What a play command asks for.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum PlayRequest {
    All,
    Album { key: AlbumKey, ordinal: usize },
    Filtered { term: String },
    Track { key: AlbumKey, ordinal: usize },
}


/// One scanned album.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct Album {
    /// Playlist file name inside the album folder.
    pub playlist_file: String,
    /// Track file names in playlist order.
    pub tracks: Vec<String>,
    /// Audio files found in the folder.
    pub audio_files: usize,
}


type Albums = BTreeMap<String, Album>;
type Artists = BTreeMap<String, Albums>;


/// Scanned library: type → artist → album.
#[derive( Debug, Clone, Default )]
pub struct Library {
    root: PathBuf,
    types: BTreeMap<String, Artists>,
}


impl Library {
    /// Creates an empty library rooted at `root`.
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self {
            root: root.into(),
            types: BTreeMap::new(),
        }
    }


    /// Adds or replaces an album.
    pub fn insert( &mut self, key: AlbumKey, album: Album ) {
        self.types
            .entry( key.kind )
            .or_default()
            .entry( key.artist )
            .or_default()
            .insert( key.album, album );
    }


    pub fn root( &self ) -> &Path {
        &self.root
    }


    pub fn is_empty( &self ) -> bool {
        self.album_keys().next().is_none()
    }


    pub fn types( &self ) -> impl Iterator<Item = &str> {
        self.types.keys().map( String::as_str )
    }


    pub fn artists( &self, kind: &str ) -> Result<impl Iterator<Item = &str>, LibraryError> {
        Ok( self.artists_of( kind )?.keys().map( String::as_str ) )
    }


    pub fn albums( &self, kind: &str, artist: &str ) -> Result<impl Iterator<Item = &str>, LibraryError> {
        Ok( self.albums_of( kind, artist )?.keys().map( String::as_str ) )
    }


    /// Every album key in sorted order.
    pub fn album_keys( &self ) -> impl Iterator<Item = AlbumKey> + '_ {
        self.types.iter().flat_map( |( kind, artists )| {
            artists.iter().flat_map( move |( artist, albums )| {
                albums.keys().map( move |album| AlbumKey::new( kind, artist, album ) )
            })
        })
    }


    pub fn album( &self, key: &AlbumKey ) -> Result<&Album, LibraryError> {
        self.albums_of( &key.kind, &key.artist )?
            .get( &key.album )
            .ok_or_else( || LibraryError::UnknownAlbum( key.to_string() ) )
    }


    /// Builds the playlist for one album.
    pub fn playlist( &self, key: &AlbumKey ) -> Result<Playlist, LibraryError> {
        let album = self.album( key )?;
        Ok( Self::to_playlist( key, album ) )
    }


    /// Playlists of every album that has tracks, in sorted order.
    pub fn playlists( &self ) -> Vec<Playlist> {
        self.album_keys()
            .filter_map( |key| self.playlist( &key ).ok() )
            .filter( |p| !p.is_empty() )
            .collect()
    }


    /// Playlists restricted to tracks whose file name contains `term`.
    pub fn filtered( &self, term: &str ) -> Vec<Playlist> {
        let needle = term.to_lowercase();
        self.playlists()
            .into_iter()
            .filter_map( |mut playlist| {
                playlist.track_file_names.retain( |t| t.to_lowercase().contains( &needle ) );
                ( !playlist.is_empty() ).then_some( playlist )
            })
            .collect()
    }


    /// Resolves a play request into playlists and a 1-based start ordinal.
    pub fn resolve( &self, request: &PlayRequest ) -> Result<( Vec<Playlist>, usize ), LibraryError> {
        let ( playlists, ordinal ) = match request {
            PlayRequest::All => ( self.playlists(), 1 ),
            PlayRequest::Album { key, ordinal } => ( vec![ self.playlist( key )? ], *ordinal ),
            PlayRequest::Filtered { term } => ( self.filtered( term ), 1 ),
            PlayRequest::Track { key, ordinal } => {
                let mut playlist = self.playlist( key )?;
                let track = ordinal.checked_sub( 1 )
                    .and_then( |i| playlist.track_file_names.get( i ).cloned() )
                    .ok_or_else( || LibraryError::UnknownTrack {
                        album: key.to_string(),
                        ordinal: *ordinal,
                    })?;
                playlist.track_file_names = vec![ track ];
                ( vec![ playlist ], 1 )
            }
        };

        if playlists.iter().all( Playlist::is_empty ) {
            return Err( LibraryError::Empty );
        }
        Ok(( playlists, ordinal.max( 1 ) ))
    }


    fn artists_of( &self, kind: &str ) -> Result<&Artists, LibraryError> {
        self.types
            .get( kind )
            .ok_or_else( || LibraryError::UnknownType( kind.to_string() ) )
    }


    fn albums_of( &self, kind: &str, artist: &str ) -> Result<&Albums, LibraryError> {
        self.artists_of( kind )?
            .get( artist )
            .ok_or_else( || LibraryError::UnknownArtist( format!( "{}/{}", kind, artist ) ) )
    }


    fn to_playlist( key: &AlbumKey, album: &Album ) -> Playlist {
        Playlist::new(
            PlaylistInfo::new( &album.playlist_file, key.relative_path(), album.audio_files ),
            album.tracks.clone(),
        )
    }
}


/// Scanner that builds a [`Library`] from a `Type/Artist/Album` folder tree.
pub struct LibraryScanner;


impl LibraryScanner {
    /// Scans `root` three levels deep.
    pub fn scan( root: &Path ) -> Result<Library, LibraryError> {
        tracing::info!( "Scanning library: {:?}", root );

        let mut library = Library::new( root );

        for kind in Self::subdirectories( root )? {
            let kind_dir = root.join( &kind );
            for artist in Self::subdirectories( &kind_dir )? {
                let artist_dir = kind_dir.join( &artist );
                for album in Self::subdirectories( &artist_dir )? {
                    let key = AlbumKey::new( &kind, &artist, album );
                    match Self::scan_album( &artist_dir.join( &key.album ) )? {
                        Some( scanned ) => library.insert( key, scanned ),
                        None => tracing::warn!( "No playlist in {}, skipping", key ),
                    }
                }
            }
        }

        tracing::info!( "Found {} albums", library.album_keys().count() );
        Ok( library )
    }


    /// Reads one album folder. Returns `None` when it has no playlist file.
    fn scan_album( dir: &Path ) -> Result<Option<Album>, LibraryError> {
        let mut playlist_files = Vec::new();
        let mut audio_files = 0;

        for entry in Self::read_dir( dir )?.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if Self::has_extension( &path, PLAYLIST_EXTENSIONS ) {
                playlist_files.push( path );
            } else if Self::has_extension( &path, SUPPORTED_EXTENSIONS ) {
                audio_files += 1;
            }
        }

        playlist_files.sort();
        let Some( playlist_path ) = playlist_files.into_iter().next() else {
            return Ok( None );
        };

        let tracks = read_m3u( &playlist_path )?;
        if tracks.len() != audio_files {
            tracing::debug!(
                "{:?}: playlist lists {} tracks, folder has {} audio files",
                playlist_path,
                tracks.len(),
                audio_files
            );
        }

        Ok( Some( Album {
            playlist_file: playlist_path
                .file_name()
                .map( |n| n.to_string_lossy().into_owned() )
                .unwrap_or_default(),
            tracks,
            audio_files,
        }))
    }


    fn subdirectories( dir: &Path ) -> Result<Vec<String>, LibraryError> {
        let mut names: Vec<String> = Self::read_dir( dir )?
            .flatten()
            .filter( |e| e.path().is_dir() )
            .filter_map( |e| e.file_name().to_str().map( str::to_string ) )
            .filter( |name| !name.starts_with( '.' ) )
            .collect();
        names.sort();
        Ok( names )
    }


    /// Lists a directory; inaccessible directories read as empty.
    fn read_dir( dir: &Path ) -> Result<Box<dyn Iterator<Item = std::io::Result<fs::DirEntry>>>, LibraryError> {
        match fs::read_dir( dir ) {
            Ok( entries ) => Ok( Box::new( entries ) ),
            Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!( "Access denied: {:?}", dir );
                Ok( Box::new( std::iter::empty() ) )
            }
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                Err( LibraryError::NotFound( dir.to_path_buf() ) )
            }
            Err( e ) => Err( LibraryError::Io( e ) ),
        }
    }


    fn has_extension( path: &Path, extensions: &[&str] ) -> bool {
        path.extension()
            .and_then( |e| e.to_str() )
            .map( |e| extensions.contains( &e.to_lowercase().as_str() ) )
            .unwrap_or( false )
    }
}


/// Reads the track entries of an M3U playlist, skipping comments and blanks.
pub fn read_m3u( path: &Path ) -> Result<Vec<String>, LibraryError> {
    let reader = BufReader::new( File::open( path )? );
    let mut tracks = Vec::new();

    for line in reader.lines() {
        let line = line?;
        let trimmed = line.trim().trim_start_matches( '\u{feff}' );
        if trimmed.is_empty() || trimmed.starts_with( '#' ) {
            continue;
        }
        tracks.push( trimmed.to_string() );
    }

    Ok( tracks )
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::io::Write;


    fn album( tracks: &[&str] ) -> Album {
        Album {
            playlist_file: "album.m3u".to_string(),
            tracks: tracks.iter().map( |t| t.to_string() ).collect(),
            audio_files: tracks.len(),
        }
    }


    fn sample_library() -> Library {
        let mut library = Library::new( "/music" );
        library.insert( AlbumKey::new( "Rock", "Band", "Debut" ), album( &[ "01 Start.mp3", "02 Middle.mp3" ] ) );
        library.insert( AlbumKey::new( "Rock", "Band", "Empty" ), album( &[] ) );
        library.insert( AlbumKey::new( "Jazz", "Trio", "Live" ), album( &[ "Blue Start.flac" ] ) );
        library
    }


    #[test]
    fn test_parse_album_key() {
        let key: AlbumKey = "Rock/Band/Debut".parse().unwrap();
        assert_eq!( key, AlbumKey::new( "Rock", "Band", "Debut" ) );
        assert_eq!( key.relative_path(), PathBuf::from( "Rock/Band/Debut" ) );
        assert!( matches!( "Rock/Band".parse::<AlbumKey>(), Err( LibraryError::InvalidKey( _ ) ) ) );
    }


    #[test]
    fn test_lookups_are_fallible() {
        let library = sample_library();
        assert!( matches!(
            library.album( &AlbumKey::new( "Pop", "Band", "Debut" ) ),
            Err( LibraryError::UnknownType( _ ) )
        ));
        assert!( matches!(
            library.album( &AlbumKey::new( "Rock", "Nobody", "Debut" ) ),
            Err( LibraryError::UnknownArtist( _ ) )
        ));
        assert!( matches!(
            library.album( &AlbumKey::new( "Rock", "Band", "Nope" ) ),
            Err( LibraryError::UnknownAlbum( _ ) )
        ));
    }


    #[test]
    fn test_playlists_skip_empty_albums_in_sorted_order() {
        let library = sample_library();
        let playlists = library.playlists();
        let paths: Vec<PathBuf> = playlists.iter().map( |p| p.info.relative_path.clone() ).collect();
        assert_eq!( paths, vec![ PathBuf::from( "Jazz/Trio/Live" ), PathBuf::from( "Rock/Band/Debut" ) ] );
    }


    #[test]
    fn test_filtered_keeps_matching_tracks() {
        let library = sample_library();
        let playlists = library.filtered( "start" );
        let tracks: Vec<&str> = playlists.iter()
            .flat_map( |p| p.track_file_names.iter().map( String::as_str ) )
            .collect();
        assert_eq!( tracks, vec![ "Blue Start.flac", "01 Start.mp3" ] );
    }


    #[test]
    fn test_resolve_single_track() {
        let library = sample_library();
        let key = AlbumKey::new( "Rock", "Band", "Debut" );
        let ( playlists, ordinal ) = library.resolve( &PlayRequest::Track { key: key.clone(), ordinal: 2 } ).unwrap();
        assert_eq!( ordinal, 1 );
        assert_eq!( playlists[ 0 ].track_file_names, vec![ "02 Middle.mp3".to_string() ] );

        let missing = library.resolve( &PlayRequest::Track { key, ordinal: 3 } );
        assert!( matches!( missing, Err( LibraryError::UnknownTrack { .. } ) ) );
    }


    #[test]
    fn test_resolve_empty_album_is_an_error() {
        let library = sample_library();
        let key = AlbumKey::new( "Rock", "Band", "Empty" );
        let result = library.resolve( &PlayRequest::Album { key, ordinal: 0 } );
        assert!( matches!( result, Err( LibraryError::Empty ) ) );
    }


    #[test]
    fn test_scan_folder_tree() {
        let root = tempfile::tempdir().unwrap();
        let album_dir = root.path().join( "Rock" ).join( "Band" ).join( "Debut" );
        fs::create_dir_all( &album_dir ).unwrap();
        for name in [ "b.mp3", "a.mp3" ] {
            File::create( album_dir.join( name ) ).unwrap();
        }
        let mut m3u = File::create( album_dir.join( "Debut.m3u" ) ).unwrap();
        writeln!( m3u, "#EXTM3U" ).unwrap();
        writeln!( m3u, "b.mp3" ).unwrap();
        writeln!( m3u ).unwrap();
        writeln!( m3u, "a.mp3" ).unwrap();

        let bare = root.path().join( "Rock" ).join( "Band" ).join( "NoPlaylist" );
        fs::create_dir_all( &bare ).unwrap();

        let library = LibraryScanner::scan( root.path() ).unwrap();
        let album = library.album( &AlbumKey::new( "Rock", "Band", "Debut" ) ).unwrap();
        assert_eq!( album.tracks, vec![ "b.mp3".to_string(), "a.mp3".to_string() ] );
        assert_eq!( album.audio_files, 2 );
        assert_eq!( album.playlist_file, "Debut.m3u" );
        assert!( library.album( &AlbumKey::new( "Rock", "Band", "NoPlaylist" ) ).is_err() );
    }


    #[test]
    fn test_scan_missing_root() {
        let result = LibraryScanner::scan( Path::new( "/definitely/not/here" ) );
        assert!( matches!( result, Err( LibraryError::NotFound( _ ) ) ) );
    }
}
