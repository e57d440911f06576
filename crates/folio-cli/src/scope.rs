//! Library access scope for local folders.

use std::fs;
use std::io;
use std::path::PathBuf;

use folio_core::AccessScope;


/// Checks the library root is still readable when a session starts.
pub struct LibraryScope {
    root: PathBuf,
}


impl LibraryScope {
    pub fn new( root: impl Into<PathBuf> ) -> Self {
        Self { root: root.into() }
    }
}


impl AccessScope for LibraryScope {
    fn acquire( &mut self ) -> io::Result<()> {
        fs::read_dir( &self.root )?;
        tracing::debug!( "Library {:?} accessible", self.root );
        Ok(())
    }


    fn release( &mut self ) {
        tracing::debug!( "Library {:?} released", self.root );
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_acquire_requires_existing_root() {
        let dir = tempfile::tempdir().unwrap();
        assert!( LibraryScope::new( dir.path() ).acquire().is_ok() );
        assert!( LibraryScope::new( dir.path().join( "gone" ) ).acquire().is_err() );
    }
}
