//! Album index
//!
//! Groups catalog records by `(artist, album)` into track-ordered lists of
//! server-relative paths.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

use crate::catalog::{ Catalog, CatalogError, CatalogRecord };


/// Errors that can occur while building the index.
#[derive( Debug, Error )]
pub enum LibraryError {
    #[error( "catalog query failed: {0}" )]
    Catalog( #[from] CatalogError ),

    #[error( "catalog entry outside the music directory: {0}" )]
    OutsideRoot( String ),
}


/// Identifies an album.
#[derive( Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash )]
pub struct AlbumKey {
    pub artist: String,
    pub album: String,
}


impl AlbumKey {
    pub fn new( artist: impl Into<String>, album: impl Into<String> ) -> Self {
        Self { artist: artist.into(), album: album.into() }
    }
}


impl fmt::Display for AlbumKey {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        write!( f, "{} - {}", self.artist, self.album )
    }
}


/// Read-only mapping from album to its track paths, in track order.
///
/// Paths are relative to the music root and always start with `/`, so they
/// can be appended directly to the media server's base URL.
#[derive( Debug, Default, Clone )]
pub struct LibraryIndex {
    albums: BTreeMap<AlbumKey, Vec<String>>,
}


impl LibraryIndex {
    /// Builds the index from raw catalog records.
    ///
    /// Records are ordered by artist, album and track number; equal track
    /// numbers keep the catalog's order. Every `file_uri` must start with
    /// `root_prefix`, otherwise the catalog and the served directory
    /// disagree and the build fails.
    pub fn build( mut records: Vec<CatalogRecord>, root_prefix: &str ) -> Result<Self, LibraryError> {
        records.sort_by( |a, b| {
            ( &a.artist, &a.album, a.track_number ).cmp( &( &b.artist, &b.album, b.track_number ) )
        });

        let mut albums: BTreeMap<AlbumKey, Vec<String>> = BTreeMap::new();
        for record in records {
            let path = relative_path( &record.file_uri, root_prefix )?;
            albums
                .entry( AlbumKey::new( record.artist, record.album ) )
                .or_default()
                .push( path.to_string() );
        }

        Ok( Self { albums } )
    }


    /// Albums in `(artist, album)` order.
    pub fn albums( &self ) -> impl Iterator<Item = &AlbumKey> {
        self.albums.keys()
    }


    /// Track paths of an album, or `None` for an unknown album.
    pub fn tracks( &self, key: &AlbumKey ) -> Option<&[String]> {
        self.albums.get( key ).map( |v| v.as_slice() )
    }


    pub fn contains( &self, key: &AlbumKey ) -> bool {
        self.albums.contains_key( key )
    }


    /// Number of albums.
    pub fn len( &self ) -> usize {
        self.albums.len()
    }


    pub fn is_empty( &self ) -> bool {
        self.albums.is_empty()
    }


    /// Total number of tracks across all albums.
    pub fn track_count( &self ) -> usize {
        self.albums.values().map( Vec::len ).sum()
    }
}


/// Builds the index from a catalog snapshot.
pub fn build_index( catalog: &dyn Catalog, root_prefix: &str ) -> Result<LibraryIndex, LibraryError> {
    let records = catalog.fetch()?;
    let index = LibraryIndex::build( records, root_prefix )?;
    tracing::info!( "Indexed {} albums ({} tracks)", index.len(), index.track_count() );
    Ok( index )
}


/// Strips `root_prefix` from `uri` exactly once.
fn relative_path<'a>( uri: &'a str, root_prefix: &str ) -> Result<&'a str, LibraryError> {
    uri.strip_prefix( root_prefix )
        .filter( |rest| rest.starts_with( '/' ) )
        .ok_or_else( || LibraryError::OutsideRoot( uri.to_string() ) )
}


#[cfg( test )]
mod tests {
    use super::*;

    const ROOT: &str = "file:///home/ana/Music";


    fn record( artist: &str, album: &str, track: u32, file: &str ) -> CatalogRecord {
        CatalogRecord {
            artist: artist.into(),
            album: album.into(),
            track_number: track,
            file_uri: format!( "{}{}", ROOT, file ),
        }
    }


    struct FixedCatalog( Vec<CatalogRecord> );

    impl Catalog for FixedCatalog {
        fn fetch( &self ) -> Result<Vec<CatalogRecord>, CatalogError> {
            Ok( self.0.clone() )
        }
    }


    #[test]
    fn test_tracks_sorted_by_number() {
        let index = LibraryIndex::build( vec![
            record( "Low", "Things We Lost", 3, "/Low/03.flac" ),
            record( "Low", "Things We Lost", 1, "/Low/01.flac" ),
            record( "Low", "Things We Lost", 2, "/Low/02.flac" ),
        ], ROOT ).unwrap();

        let tracks = index.tracks( &AlbumKey::new( "Low", "Things We Lost" ) ).unwrap();
        assert_eq!( tracks, [ "/Low/01.flac", "/Low/02.flac", "/Low/03.flac" ] );
    }


    #[test]
    fn test_keys_are_distinct_pairs() {
        let index = LibraryIndex::build( vec![
            record( "B", "Two", 1, "/b/2/1.mp3" ),
            record( "A", "One", 1, "/a/1/1.mp3" ),
            record( "B", "One", 1, "/b/1/1.mp3" ),
            record( "A", "One", 2, "/a/1/2.mp3" ),
        ], ROOT ).unwrap();

        let keys: Vec<_> = index.albums().cloned().collect();
        assert_eq!( keys, vec![
            AlbumKey::new( "A", "One" ),
            AlbumKey::new( "B", "One" ),
            AlbumKey::new( "B", "Two" ),
        ]);
        assert_eq!( index.track_count(), 4 );
    }


    #[test]
    fn test_equal_track_numbers_keep_catalog_order() {
        let index = LibraryIndex::build( vec![
            record( "A", "Live", 0, "/a/live/z.mp3" ),
            record( "A", "Live", 0, "/a/live/a.mp3" ),
        ], ROOT ).unwrap();

        let tracks = index.tracks( &AlbumKey::new( "A", "Live" ) ).unwrap();
        assert_eq!( tracks, [ "/a/live/z.mp3", "/a/live/a.mp3" ] );
    }


    #[test]
    fn test_prefix_stripped_once() {
        let uri = format!( "{}/nested{}/x.mp3", ROOT, ROOT );
        let path = relative_path( &uri, ROOT ).unwrap();
        assert_eq!( path, "/nestedfile:///home/ana/Music/x.mp3" );
    }


    #[test]
    fn test_uri_outside_root_fails() {
        let result = LibraryIndex::build( vec![ CatalogRecord {
            artist: "A".into(),
            album: "B".into(),
            track_number: 1,
            file_uri: "file:///mnt/usb/song.mp3".into(),
        }], ROOT );
        assert!( matches!( result, Err( LibraryError::OutsideRoot( _ ) ) ) );
    }


    #[test]
    fn test_sibling_directory_is_outside_root() {
        // Shares the textual prefix but is a different directory
        let result = relative_path( "file:///home/ana/Music2/x.mp3", ROOT );
        assert!( result.is_err() );
    }


    #[test]
    fn test_build_index_from_catalog() {
        let catalog = FixedCatalog( vec![ record( "A", "One", 1, "/a/1.mp3" ) ] );
        let index = build_index( &catalog, ROOT ).unwrap();
        assert!( index.contains( &AlbumKey::new( "A", "One" ) ) );
        assert!( !index.contains( &AlbumKey::new( "A", "Two" ) ) );
    }
}
