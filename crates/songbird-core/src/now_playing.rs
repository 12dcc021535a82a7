//! "Now playing" polling
//!
//! The speaker reports the loaded track as a DIDL-Lite document. Each poll
//! tick reads it, extracts title, artist and album, and forwards a display
//! string only when the triple differs from the last one shown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::MissedTickBehavior;

use crate::device::Device;
use crate::xml::child_texts;


/// Errors that can occur while parsing track metadata.
#[derive( Debug, Error )]
pub enum MetadataError {
    #[error( "Malformed metadata: {0}" )]
    Xml( #[from] quick_xml::Error ),

    #[error( "Metadata has no item" )]
    NoItem,

    #[error( "Metadata has no title" )]
    NoTitle,
}


/// What the speaker is playing, as shown to the user.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct NowPlayingView {
    pub title: String,
    pub artist: Option<String>,
    pub album: Option<String>,
}


impl NowPlayingView {
    /// Title, plus "artist · album" on a second line when both are known.
    pub fn display_text( &self ) -> String {
        match ( &self.artist, &self.album ) {
            ( Some( artist ), Some( album ) ) => format!( "{}\n{} · {}", self.title, artist, album ),
            _ => self.title.clone(),
        }
    }
}


/// Extracts the view from a DIDL-Lite document.
pub fn parse_track_metadata( didl: &str ) -> Result<NowPlayingView, MetadataError> {
    let item = child_texts( didl, "item" )?.ok_or( MetadataError::NoItem )?;
    let field = |name: &str| {
        item.get( name )
            .map( |v| v.trim() )
            .filter( |v| !v.is_empty() )
            .map( str::to_string )
    };

    Ok( NowPlayingView {
        title: field( "title" ).ok_or( MetadataError::NoTitle )?,
        artist: field( "creator" ),
        album: field( "album" ),
    })
}


/// Remembers the last view shown and filters out repeats.
#[derive( Debug, Default )]
pub struct NowPlayingTracker {
    last: Option<NowPlayingView>,
}


impl NowPlayingTracker {
    pub fn new() -> Self {
        Self::default()
    }


    /// Returns the view if it differs from the previous one.
    pub fn observe( &mut self, view: NowPlayingView ) -> Option<&NowPlayingView> {
        if self.last.as_ref() == Some( &view ) {
            return None;
        }
        self.last = Some( view );
        self.last.as_ref()
    }


    /// Handles one raw metadata snapshot; returns display text on change.
    ///
    /// Absent or unparseable metadata leaves the display as it was.
    pub fn tick( &mut self, metadata: Option<&str> ) -> Option<String> {
        let didl = metadata?;
        match parse_track_metadata( didl ) {
            Ok( view ) => self.observe( view ).map( NowPlayingView::display_text ),
            Err( e ) => {
                tracing::debug!( "Ignoring track metadata: {}", e );
                None
            }
        }
    }
}


/// Polls `device` every `period`, handing display text to `emit` on change.
///
/// Returns once `emit` reports that nobody is listening any more.
pub async fn poll<F>( device: Arc<dyn Device>, period: Duration, mut emit: F )
where
    F: FnMut( String ) -> bool + Send + 'static,
{
    // First read one period after discovery
    let start = tokio::time::Instant::now() + period;
    let mut interval = tokio::time::interval_at( start, period );
    interval.set_missed_tick_behavior( MissedTickBehavior::Skip );
    let mut tracker = NowPlayingTracker::new();

    loop {
        interval.tick().await;

        let reader = Arc::clone( &device );
        let metadata = match tokio::task::spawn_blocking( move || reader.current_track_info() ).await {
            Ok( Ok( info ) ) => info.metadata,
            Ok( Err( e ) ) => {
                tracing::debug!( "Reading track info failed: {}", e );
                continue;
            }
            Err( e ) => {
                tracing::warn!( "Track info task failed: {}", e );
                continue;
            }
        };

        if let Some( text ) = tracker.tick( metadata.as_deref() ) {
            if !emit( text ) {
                break;
            }
        }
    }
    tracing::debug!( "Now-playing poller stopped" );
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use crate::device::{ DeviceError, TrackInfo };

    const DIDL: &str = r#"<DIDL-Lite xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns:upnp="urn:schemas-upnp-org:metadata-1-0/upnp/" xmlns:r="urn:schemas-rinconnetworks-com:metadata-1-0/" xmlns="urn:schemas-upnp-org:metadata-1-0/DIDL-Lite/"><item id="-1" parentID="-1" restricted="true"><res protocolInfo="http-get:*:audio/flac:*" duration="0:04:12">http://10.0.0.2:8080/Low/Trust/01.flac</res><r:streamContent></r:streamContent><upnp:albumArtURI>/getaa?s=1</upnp:albumArtURI><dc:title>(That&apos;s How You Sing) Amazing Grace</dc:title><upnp:class>object.item.audioItem.musicTrack</upnp:class><dc:creator>Low</dc:creator><upnp:album>Trust</upnp:album></item></DIDL-Lite>"#;


    fn view( title: &str, artist: Option<&str>, album: Option<&str> ) -> NowPlayingView {
        NowPlayingView {
            title: title.to_string(),
            artist: artist.map( str::to_string ),
            album: album.map( str::to_string ),
        }
    }


    #[test]
    fn test_parse_full_metadata() {
        let parsed = parse_track_metadata( DIDL ).unwrap();
        assert_eq!( parsed, view( "(That's How You Sing) Amazing Grace", Some( "Low" ), Some( "Trust" ) ) );
    }


    #[test]
    fn test_parse_without_title_fails() {
        let didl = "<DIDL-Lite><item><dc:creator>Low</dc:creator></item></DIDL-Lite>";
        assert!( matches!( parse_track_metadata( didl ), Err( MetadataError::NoTitle ) ) );
    }


    #[test]
    fn test_parse_garbage_fails() {
        assert!( parse_track_metadata( "not xml at all" ).is_err() );
        assert!( parse_track_metadata( "<item><title>x</wrong></item>" ).is_err() );
    }


    #[test]
    fn test_display_text() {
        assert_eq!( view( "Song", Some( "Artist" ), Some( "Album" ) ).display_text(), "Song\nArtist · Album" );
        assert_eq!( view( "Song", Some( "Artist" ), None ).display_text(), "Song" );
        assert_eq!( view( "Song", None, Some( "Album" ) ).display_text(), "Song" );
    }


    #[test]
    fn test_empty_fields_are_absent() {
        let didl = "<DIDL-Lite><item><dc:title>Song</dc:title><dc:creator> </dc:creator><upnp:album>A</upnp:album></item></DIDL-Lite>";
        let parsed = parse_track_metadata( didl ).unwrap();
        assert_eq!( parsed.artist, None );
        assert_eq!( parsed.display_text(), "Song" );
    }


    #[test]
    fn test_tracker_suppresses_repeats() {
        let mut tracker = NowPlayingTracker::new();
        let mut emitted = Vec::new();
        for _ in 0..10 {
            emitted.extend( tracker.tick( Some( DIDL ) ) );
        }
        assert_eq!( emitted, vec![ "(That's How You Sing) Amazing Grace\nLow · Trust".to_string() ] );
    }


    #[test]
    fn test_tracker_emits_on_change() {
        let mut tracker = NowPlayingTracker::new();
        assert!( tracker.observe( view( "A", None, None ) ).is_some() );
        assert!( tracker.observe( view( "A", None, None ) ).is_none() );
        assert!( tracker.observe( view( "B", None, None ) ).is_some() );
        assert!( tracker.observe( view( "A", None, None ) ).is_some() );
    }


    #[test]
    fn test_tracker_ignores_absent_and_bad_metadata() {
        let mut tracker = NowPlayingTracker::new();
        assert!( tracker.tick( Some( DIDL ) ).is_some() );
        assert_eq!( tracker.tick( None ), None );
        assert_eq!( tracker.tick( Some( "<broken" ) ), None );
        // Still remembers the last good view
        assert_eq!( tracker.tick( Some( DIDL ) ), None );
    }


    /// Device whose track info follows a fixed script, one entry per read.
    struct ScriptedDevice {
        script: Mutex<VecDeque<Result<Option<String>, DeviceError>>>,
        reads: Mutex<usize>,
    }


    impl ScriptedDevice {
        fn new( script: Vec<Result<Option<String>, DeviceError>> ) -> Self {
            Self { script: Mutex::new( script.into() ), reads: Mutex::new( 0 ) }
        }


        fn reads( &self ) -> usize {
            *self.reads.lock().unwrap()
        }
    }


    impl Device for ScriptedDevice {
        fn name( &self ) -> &str {
            "scripted"
        }

        fn clear_queue( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn add_uri_to_queue( &self, _uri: &str ) -> Result<(), DeviceError> { Ok( () ) }
        fn play_from_queue( &self, _index: usize ) -> Result<(), DeviceError> { Ok( () ) }
        fn play( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn pause( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn stop( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn next( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn previous( &self ) -> Result<(), DeviceError> { Ok( () ) }
        fn seek( &self, _position: Duration ) -> Result<(), DeviceError> { Ok( () ) }

        fn current_track_info( &self ) -> Result<TrackInfo, DeviceError> {
            *self.reads.lock().unwrap() += 1;
            let next = self.script.lock().unwrap().pop_front().unwrap_or( Ok( None ) );
            next.map( |metadata| TrackInfo { metadata, position: "0:00:00".to_string() } )
        }

        fn volume( &self ) -> Result<u8, DeviceError> { Ok( 0 ) }
        fn set_volume( &self, _volume: u8 ) -> Result<(), DeviceError> { Ok( () ) }
    }


    fn didl_titled( title: &str ) -> String {
        format!( "<DIDL-Lite><item><dc:title>{}</dc:title></item></DIDL-Lite>", title )
    }


    #[tokio::test( start_paused = true )]
    async fn test_poll_emits_changes_and_stops_when_unheard() {
        let period = Duration::from_secs( 1 );
        let device = Arc::new( ScriptedDevice::new( vec![
            Ok( Some( didl_titled( "A" ) ) ),
            Err( DeviceError::response( "GetPositionInfo", "timed out" ) ),
            Ok( None ),
            Ok( Some( didl_titled( "A" ) ) ),
            Ok( Some( didl_titled( "B" ) ) ),
        ]));

        let emitted = Arc::new( Mutex::new( Vec::new() ) );
        let sink = Arc::clone( &emitted );
        let emit = move |text: String| {
            let mut emitted = sink.lock().unwrap();
            emitted.push( text );
            // Nobody listens after the second change
            emitted.len() < 2
        };

        let poller = tokio::spawn( poll( Arc::clone( &device ) as Arc<dyn Device>, period, emit ) );

        // Nothing is read before the first period has elapsed
        tokio::time::sleep( period - Duration::from_millis( 10 ) ).await;
        assert_eq!( device.reads(), 0 );

        tokio::time::timeout( Duration::from_secs( 60 ), poller ).await.unwrap().unwrap();

        assert_eq!( *emitted.lock().unwrap(), vec![ "A".to_string(), "B".to_string() ] );
        assert_eq!( device.reads(), 5 );
    }


    #[tokio::test( start_paused = true )]
    async fn test_poll_keeps_running_through_errors() {
        let device = Arc::new( ScriptedDevice::new( vec![
            Err( DeviceError::response( "GetPositionInfo", "timed out" ) ),
            Err( DeviceError::response( "GetPositionInfo", "timed out" ) ),
            Ok( Some( didl_titled( "A" ) ) ),
        ]));

        let poller = tokio::spawn( poll( Arc::clone( &device ) as Arc<dyn Device>, Duration::from_secs( 1 ), |_| false ) );

        tokio::time::timeout( Duration::from_secs( 60 ), poller ).await.unwrap().unwrap();
        assert_eq!( device.reads(), 3 );
    }
}
