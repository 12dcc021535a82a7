//! Music catalog access
//!
//! The core only needs a flat list of `(artist, album, track, file URI)`
//! records. [`DirectoryCatalog`] produces them by walking the music root and
//! reading tags, standing in for a desktop search index.

use std::fs::File;
use std::path::{ Path, PathBuf };

use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::{ MetadataOptions, StandardTagKey, Tag };
use symphonia::core::probe::Hint;
use thiserror::Error;
use url::Url;


/// Supported audio file extensions.
const SUPPORTED_EXTENSIONS: &[&str] = &[
    "mp3", "flac", "ogg", "wav", "m4a", "aac", "opus", "wma", "aiff", "alac",
];


/// Errors that can occur while querying the catalog.
#[derive( Debug, Error )]
pub enum CatalogError {
    #[error( "IO error: {0}" )]
    Io( #[from] std::io::Error ),

    #[error( "Music directory not found: {0}" )]
    NotFound( PathBuf ),

    #[error( "Path cannot be expressed as a file URI: {0}" )]
    InvalidPath( PathBuf ),
}


/// One track as reported by the catalog.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct CatalogRecord {
    pub artist: String,
    pub album: String,
    pub track_number: u32,
    pub file_uri: String,
}


impl CatalogRecord {
    pub fn new(
        artist: impl Into<String>,
        album: impl Into<String>,
        track_number: u32,
        file_uri: impl Into<String>,
    ) -> Self {
        Self {
            artist: artist.into(),
            album: album.into(),
            track_number,
            file_uri: file_uri.into(),
        }
    }
}


/// Source of catalog records.
pub trait Catalog: Send + Sync {
    /// Returns a snapshot of every indexed track.
    fn fetch( &self ) -> Result<Vec<CatalogRecord>, CatalogError>;
}


/// Returns the `file://` prefix every URI under `root` starts with, without
/// a trailing slash.
pub fn root_uri_prefix( root: &Path ) -> Result<String, CatalogError> {
    let url = Url::from_directory_path( root )
        .map_err( |_| CatalogError::InvalidPath( root.to_path_buf() ) )?;
    Ok( url.as_str().trim_end_matches( '/' ).to_string() )
}


/// Catalog backed by a recursive scan of a directory.
pub struct DirectoryCatalog {
    root: PathBuf,
}


impl DirectoryCatalog {
    /// Creates a catalog rooted at `root`.
    pub fn new( root: PathBuf ) -> Self {
        Self { root }
    }


    fn scan_recursive( &self, dir: &Path, records: &mut Vec<CatalogRecord> ) -> Result<(), CatalogError> {
        let entries = match std::fs::read_dir( dir ) {
            Ok( e ) => e,
            Err( e ) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                tracing::warn!( "Access denied: {:?}", dir );
                return Ok(());
            }
            Err( e ) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err( CatalogError::NotFound( dir.to_path_buf() ) );
            }
            Err( e ) => return Err( CatalogError::Io( e ) ),
        };

        for entry in entries.flatten() {
            let path = entry.path();

            let hidden = entry.file_name().to_string_lossy().starts_with( '.' );
            if hidden {
                continue;
            }

            if path.is_dir() {
                self.scan_recursive( &path, records )?;
            } else if is_audio_file( &path ) {
                match read_tags( &path ) {
                    Some( tags ) => {
                        if let Some( record ) = tags.into_record( &path )? {
                            records.push( record );
                        }
                    }
                    None => tracing::debug!( "Unreadable tags, skipping: {:?}", path ),
                }
            }
        }

        Ok(())
    }
}


impl Catalog for DirectoryCatalog {
    fn fetch( &self ) -> Result<Vec<CatalogRecord>, CatalogError> {
        tracing::info!( "Scanning: {:?}", self.root );
        let mut records = Vec::new();
        self.scan_recursive( &self.root, &mut records )?;
        tracing::info!( "Found {} album tracks", records.len() );
        Ok( records )
    }
}


/// Tags relevant to album grouping.
#[derive( Debug, Default )]
struct AlbumTags {
    artist: Option<String>,
    album_artist: Option<String>,
    album: Option<String>,
    track_number: Option<u32>,
}


impl AlbumTags {
    fn absorb( &mut self, tags: &[Tag] ) {
        for tag in tags {
            let Some( std_key ) = tag.std_key else { continue };
            let value = tag.value.to_string().trim().to_string();
            if value.is_empty() {
                continue;
            }

            match std_key {
                StandardTagKey::Artist => {
                    self.artist.get_or_insert( value );
                }
                StandardTagKey::AlbumArtist => {
                    self.album_artist.get_or_insert( value );
                }
                StandardTagKey::Album => {
                    self.album.get_or_insert( value );
                }
                StandardTagKey::TrackNumber => {
                    if self.track_number.is_none() {
                        self.track_number = parse_track_number( &value );
                    }
                }
                _ => {}
            }
        }
    }


    /// Turns the tags into a record. Tracks without an artist or album are
    /// not album tracks and yield `None`.
    fn into_record( self, path: &Path ) -> Result<Option<CatalogRecord>, CatalogError> {
        let artist = self.album_artist.or( self.artist );
        let ( Some( artist ), Some( album ) ) = ( artist, self.album ) else {
            return Ok( None );
        };

        let file_uri = Url::from_file_path( path )
            .map_err( |_| CatalogError::InvalidPath( path.to_path_buf() ) )?;

        Ok( Some( CatalogRecord {
            artist,
            album,
            track_number: self.track_number.unwrap_or( 0 ),
            file_uri: file_uri.to_string(),
        }))
    }
}


/// Reads album tags from an audio file.
fn read_tags( path: &Path ) -> Option<AlbumTags> {
    let file = File::open( path ).ok()?;
    let mss = MediaSourceStream::new( Box::new( file ), Default::default() );

    let mut hint = Hint::new();
    if let Some( ext ) = path.extension().and_then( |e| e.to_str() ) {
        hint.with_extension( ext );
    }

    let mut probed = symphonia::default::get_probe()
        .format( &hint, mss, &FormatOptions::default(), &MetadataOptions::default() )
        .ok()?;

    let mut tags = AlbumTags::default();

    // Container-level tags (ID3 etc.) come first, then stream tags
    if let Some( metadata_log ) = probed.metadata.get() {
        if let Some( revision ) = metadata_log.current() {
            tags.absorb( revision.tags() );
        }
    }
    if let Some( revision ) = probed.format.metadata().current() {
        tags.absorb( revision.tags() );
    }

    Some( tags )
}


/// Parses a track number tag such as `"7"` or `"7/12"`.
fn parse_track_number( value: &str ) -> Option<u32> {
    value.split( '/' ).next()?.trim().parse().ok()
}


/// Checks if a file has a supported audio extension.
fn is_audio_file( path: &Path ) -> bool {
    path.extension()
        .and_then( |e| e.to_str() )
        .map( |e| SUPPORTED_EXTENSIONS.contains( &e.to_lowercase().as_str() ) )
        .unwrap_or( false )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_track_number() {
        assert_eq!( parse_track_number( "7" ), Some( 7 ) );
        assert_eq!( parse_track_number( "07/12" ), Some( 7 ) );
        assert_eq!( parse_track_number( "side A" ), None );
    }


    #[test]
    fn test_is_audio_file() {
        assert!( is_audio_file( Path::new( "/music/a.FLAC" ) ) );
        assert!( !is_audio_file( Path::new( "/music/cover.jpg" ) ) );
        assert!( !is_audio_file( Path::new( "/music/README" ) ) );
    }


    #[test]
    fn test_root_uri_prefix_has_no_trailing_slash() {
        let prefix = root_uri_prefix( Path::new( "/home/ana/Music" ) ).unwrap();
        assert_eq!( prefix, "file:///home/ana/Music" );
    }


    #[test]
    fn test_root_uri_prefix_is_percent_encoded() {
        let prefix = root_uri_prefix( Path::new( "/home/ana/My Music" ) ).unwrap();
        assert_eq!( prefix, "file:///home/ana/My%20Music" );
    }


    #[test]
    fn test_album_tags_prefer_album_artist() {
        let tags = AlbumTags {
            artist: Some( "Guest".into() ),
            album_artist: Some( "Band".into() ),
            album: Some( "Debut".into() ),
            track_number: Some( 3 ),
        };
        let record = tags.into_record( Path::new( "/m/Band/Debut/03.flac" ) ).unwrap().unwrap();
        assert_eq!( record.artist, "Band" );
        assert_eq!( record.track_number, 3 );
        assert_eq!( record.file_uri, "file:///m/Band/Debut/03.flac" );
    }


    #[test]
    fn test_album_tags_without_album_are_skipped() {
        let tags = AlbumTags {
            artist: Some( "Band".into() ),
            ..AlbumTags::default()
        };
        assert!( tags.into_record( Path::new( "/m/single.mp3" ) ).unwrap().is_none() );
    }


    #[test]
    fn test_scan_skips_untagged_and_non_audio() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write( dir.path().join( "notes.txt" ), b"hello" ).unwrap();
        std::fs::write( dir.path().join( "broken.mp3" ), b"not really audio" ).unwrap();

        let catalog = DirectoryCatalog::new( dir.path().to_path_buf() );
        assert!( catalog.fetch().unwrap().is_empty() );
    }


    #[test]
    fn test_scan_missing_root() {
        let catalog = DirectoryCatalog::new( PathBuf::from( "/definitely/not/here" ) );
        assert!( matches!( catalog.fetch(), Err( CatalogError::NotFound( _ ) ) ) );
    }
}
