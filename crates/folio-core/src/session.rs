//! Library access for the length of a playback session.

use std::io;


/// Grants access to the library root while a session is running.
///
/// The controller acquires once when a session starts and releases once
/// when playback goes idle.
pub trait AccessScope: Send {
    fn acquire( &mut self ) -> io::Result<()>;

    fn release( &mut self );
}


/// Scope for libraries that need no access grant.
#[derive( Debug, Default, Clone, Copy )]
pub struct OpenAccess;


impl AccessScope for OpenAccess {
    fn acquire( &mut self ) -> io::Result<()> {
        Ok(())
    }


    fn release( &mut self ) {}
}
