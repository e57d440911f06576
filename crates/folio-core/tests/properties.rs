//! Property-based tests for the play sequence
//!
//! Uses proptest to check the sequence invariants across random album
//! layouts and random navigation.

use std::collections::HashSet;
use std::path::PathBuf;

use folio_core::{ Playlist, PlaylistInfo, PlaylistManager };
use proptest::prelude::*;

// ===== Helpers =====

fn album( index: usize, tracks: usize ) -> Playlist {
    let name = format!( "Album {}", index );
    Playlist::new(
        PlaylistInfo::new( format!( "{}.m3u", name ), PathBuf::from( "Rock" ).join( "Band" ).join( &name ), tracks ),
        ( 1..=tracks ).map( |t| format!( "{:02} Song.flac", t ) ).collect(),
    )
}

fn albums() -> impl Strategy<Value = Vec<Playlist>> {
    prop::collection::vec( 1usize..8, 1..6 )
        .prop_map( |counts| counts.into_iter().enumerate().map( |( i, n )| album( i, n ) ).collect() )
}

fn loaded( playlists: Vec<Playlist>, shuffle: bool ) -> PlaylistManager {
    let mut manager = PlaylistManager::new( "/music" );
    manager.load( playlists, 1, shuffle ).expect( "non-empty albums load" );
    manager
}

fn identity( manager: &PlaylistManager, index: usize ) -> ( String, String ) {
    let track = manager.track_at( index ).expect( "index in range" );
    ( track.playlist().album_name(), track.file_name().to_string() )
}

// ===== Property Tests =====

proptest! {
    /// Property: the natural order is the concatenation of every album in order
    #[test]
    fn natural_order_is_concatenation( playlists in albums() ) {
        let expected: Vec<( String, String )> = playlists.iter()
            .flat_map( |p| p.track_file_names.iter().map( move |t| ( p.info.album_name(), t.clone() ) ) )
            .collect();

        let mut manager = loaded( playlists, false );
        prop_assert_eq!( manager.track_count(), expected.len() );

        let mut seen = Vec::new();
        while let Some( track ) = manager.advance() {
            prop_assert_eq!( track.ordinal(), seen.len() + 1 );
            seen.push( ( track.playlist().album_name(), track.file_name().to_string() ) );
        }
        prop_assert_eq!( seen, expected );
    }

    /// Property: shuffling yields every track exactly once
    #[test]
    fn shuffle_is_a_permutation( playlists in albums() ) {
        let total: usize = playlists.iter().map( Playlist::len ).sum();
        let manager = loaded( playlists, true );

        let unique: HashSet<_> = ( 0..total ).map( |i| identity( &manager, i ) ).collect();
        prop_assert_eq!( unique.len(), total );
        prop_assert!( manager.track_at( total ).is_none() );
    }

    /// Property: peek_next always previews what advance returns
    #[test]
    fn peek_matches_advance(
        playlists in albums(),
        shuffle in any::<bool>(),
        jumps in prop::collection::vec( 0usize..40, 0..10 )
    ) {
        let mut manager = loaded( playlists, shuffle );
        for jump in jumps {
            if jump % 3 == 0 {
                manager.jump_to( jump );
            }
            let peeked = manager.peek_next();
            let advanced = manager.advance();
            prop_assert_eq!( peeked, advanced );
        }
    }

    /// Property: jump_to accepts exactly 1..=N and the next advance lands there
    #[test]
    fn jump_to_bounds( playlists in albums(), ordinal in 0usize..50 ) {
        let mut manager = loaded( playlists, false );
        let total = manager.track_count();

        let jumped = manager.jump_to( ordinal );
        prop_assert_eq!( jumped.is_some(), ( 1..=total ).contains( &ordinal ) );
        if jumped.is_some() {
            prop_assert_eq!( manager.advance().map( |t| t.ordinal() ), Some( ordinal ) );
        }
    }

    /// Property: previous/next availability follows the ordinal
    #[test]
    fn previous_and_next_availability( playlists in albums(), ordinal in 1usize..50 ) {
        let manager = loaded( playlists, false );
        let total = manager.track_count();
        prop_assert_eq!( manager.has_previous( ordinal ), ordinal > 1 );
        prop_assert_eq!( manager.has_next( ordinal ), ordinal < total );
    }

    /// Property: switching shuffle keeps the playing track playing
    #[test]
    fn shuffle_switch_keeps_current_track(
        playlists in albums(),
        started in any::<bool>(),
        steps in 1usize..10,
        to_shuffle in any::<bool>()
    ) {
        let mut manager = loaded( playlists, !to_shuffle );
        let mut current = None;
        if started {
            for _ in 0..steps {
                match manager.advance() {
                    Some( track ) => current = Some( track ),
                    None => break,
                }
            }
        }

        let ordinal = manager.on_shuffle_mode_changed( to_shuffle );
        match current {
            Some( track ) => {
                prop_assert!( ordinal >= 1 );
                let relocated = manager.track_at( ordinal - 1 ).expect( "ordinal in range" );
                prop_assert!( relocated.same_track( &track ) );
                prop_assert_eq!( manager.peek_next().map( |t| t.ordinal() ), manager.track_at( ordinal ).map( |t| t.ordinal() ) );
            }
            None => prop_assert_eq!( ordinal, 0 ),
        }
    }

    /// Property: index_for inverts track_at in either ordering
    #[test]
    fn index_for_round_trip( playlists in albums(), shuffle in any::<bool>() ) {
        let manager = loaded( playlists, shuffle );
        for index in 0..manager.track_count() {
            let track = manager.track_at( index ).expect( "index in range" );
            prop_assert_eq!( manager.index_for( &track ), Some( index ) );
        }
    }
}
