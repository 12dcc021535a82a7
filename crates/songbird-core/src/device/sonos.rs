//! Sonos zone player over UPnP

use std::time::Duration;

use ureq::Agent;

use super::soap::{ self, ActionResponse };
use super::{ Device, DeviceError, TrackInfo };


const AV_TRANSPORT: &str = "urn:schemas-upnp-org:service:AVTransport:1";
const AV_TRANSPORT_PATH: &str = "/MediaRenderer/AVTransport/Control";

const RENDERING_CONTROL: &str = "urn:schemas-upnp-org:service:RenderingControl:1";
const RENDERING_CONTROL_PATH: &str = "/MediaRenderer/RenderingControl/Control";

/// Value the device reports when it has nothing to describe.
const NOT_IMPLEMENTED: &str = "NOT_IMPLEMENTED";


/// A discovered Sonos speaker.
pub struct SonosDevice {
    /// `http://ip:1400`
    base_url: String,
    /// Zone player id without the `uuid:` prefix, e.g. `RINCON_000E58...`.
    uid: String,
    name: String,
    agent: Agent,
}


impl SonosDevice {
    pub fn new( base_url: impl Into<String>, uid: impl Into<String>, name: impl Into<String> ) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches( '/' ).to_string(),
            uid: uid.into(),
            name: name.into(),
            agent: soap::agent(),
        }
    }


    fn av_transport( &self, action: &str, args: &[( &str, &str )] ) -> Result<ActionResponse, DeviceError> {
        let url = format!( "{}{}", self.base_url, AV_TRANSPORT_PATH );
        let mut full = vec![ ( "InstanceID", "0" ) ];
        full.extend_from_slice( args );
        soap::invoke( &self.agent, &url, AV_TRANSPORT, action, &full )
    }


    fn rendering_control( &self, action: &str, args: &[( &str, &str )] ) -> Result<ActionResponse, DeviceError> {
        let url = format!( "{}{}", self.base_url, RENDERING_CONTROL_PATH );
        let mut full = vec![ ( "InstanceID", "0" ), ( "Channel", "Master" ) ];
        full.extend_from_slice( args );
        soap::invoke( &self.agent, &url, RENDERING_CONTROL, action, &full )
    }
}


impl Device for SonosDevice {
    fn name( &self ) -> &str {
        &self.name
    }


    fn clear_queue( &self ) -> Result<(), DeviceError> {
        self.av_transport( "RemoveAllTracksFromQueue", &[] ).map( |_| () )
    }


    fn add_uri_to_queue( &self, uri: &str ) -> Result<(), DeviceError> {
        self.av_transport( "AddURIToQueue", &[
            ( "EnqueuedURI", uri ),
            ( "EnqueuedURIMetaData", "" ),
            ( "DesiredFirstTrackNumberEnqueued", "0" ),
            ( "EnqueueAsNext", "0" ),
        ]).map( |_| () )
    }


    fn play_from_queue( &self, index: usize ) -> Result<(), DeviceError> {
        // The queue has to be the active transport source before seeking in it
        let queue_uri = queue_uri( &self.uid );
        self.av_transport( "SetAVTransportURI", &[
            ( "CurrentURI", &queue_uri ),
            ( "CurrentURIMetaData", "" ),
        ])?;

        let track = ( index + 1 ).to_string();
        self.av_transport( "Seek", &[ ( "Unit", "TRACK_NR" ), ( "Target", &track ) ] )?;
        self.play()
    }


    fn play( &self ) -> Result<(), DeviceError> {
        self.av_transport( "Play", &[ ( "Speed", "1" ) ] ).map( |_| () )
    }


    fn pause( &self ) -> Result<(), DeviceError> {
        self.av_transport( "Pause", &[] ).map( |_| () )
    }


    fn stop( &self ) -> Result<(), DeviceError> {
        self.av_transport( "Stop", &[] ).map( |_| () )
    }


    fn next( &self ) -> Result<(), DeviceError> {
        self.av_transport( "Next", &[] ).map( |_| () )
    }


    fn previous( &self ) -> Result<(), DeviceError> {
        self.av_transport( "Previous", &[] ).map( |_| () )
    }


    fn seek( &self, position: Duration ) -> Result<(), DeviceError> {
        let target = format_rel_time( position );
        self.av_transport( "Seek", &[ ( "Unit", "REL_TIME" ), ( "Target", &target ) ] ).map( |_| () )
    }


    fn current_track_info( &self ) -> Result<TrackInfo, DeviceError> {
        let response = self.av_transport( "GetPositionInfo", &[] )?;
        Ok( TrackInfo {
            metadata: normalize_metadata( response.get( "TrackMetaData" ) ),
            position: response.get( "RelTime" ).unwrap_or_default().to_string(),
        })
    }


    fn volume( &self ) -> Result<u8, DeviceError> {
        let response = self.rendering_control( "GetVolume", &[] )?;
        let raw = response.require( "GetVolume", "CurrentVolume" )?;
        parse_volume( raw ).ok_or_else( || DeviceError::response( "GetVolume", format!( "bad volume {:?}", raw ) ) )
    }


    fn set_volume( &self, volume: u8 ) -> Result<(), DeviceError> {
        let desired = volume.min( 100 ).to_string();
        self.rendering_control( "SetVolume", &[ ( "DesiredVolume", &desired ) ] ).map( |_| () )
    }
}


/// The transport URI that makes the zone play its own queue.
fn queue_uri( uid: &str ) -> String {
    format!( "x-rincon-queue:{}#0", uid )
}


/// Formats a position as the `HH:MM:SS` the device expects.
fn format_rel_time( position: Duration ) -> String {
    let secs = position.as_secs();
    format!( "{:02}:{:02}:{:02}", secs / 3600, ( secs % 3600 ) / 60, secs % 60 )
}


fn normalize_metadata( raw: Option<&str> ) -> Option<String> {
    raw.map( str::trim )
        .filter( |m| !m.is_empty() && *m != NOT_IMPLEMENTED )
        .map( str::to_string )
}


fn parse_volume( raw: &str ) -> Option<u8> {
    raw.trim().parse::<u16>().ok().map( |v| v.min( 100 ) as u8 )
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_queue_uri() {
        assert_eq!( queue_uri( "RINCON_000E58A0123401400" ), "x-rincon-queue:RINCON_000E58A0123401400#0" );
    }


    #[test]
    fn test_format_rel_time() {
        assert_eq!( format_rel_time( Duration::ZERO ), "00:00:00" );
        assert_eq!( format_rel_time( Duration::from_secs( 3723 ) ), "01:02:03" );
    }


    #[test]
    fn test_normalize_metadata() {
        assert_eq!( normalize_metadata( None ), None );
        assert_eq!( normalize_metadata( Some( "" ) ), None );
        assert_eq!( normalize_metadata( Some( "NOT_IMPLEMENTED" ) ), None );
        assert_eq!( normalize_metadata( Some( "<DIDL-Lite/>" ) ).as_deref(), Some( "<DIDL-Lite/>" ) );
    }


    #[test]
    fn test_parse_volume() {
        assert_eq!( parse_volume( "42" ), Some( 42 ) );
        assert_eq!( parse_volume( " 7 " ), Some( 7 ) );
        assert_eq!( parse_volume( "250" ), Some( 100 ) );
        assert_eq!( parse_volume( "loud" ), None );
    }


    #[test]
    fn test_new_trims_base_url() {
        let device = SonosDevice::new( "http://192.168.1.30:1400/", "RINCON_1", "Kitchen" );
        assert_eq!( device.base_url, "http://192.168.1.30:1400" );
        assert_eq!( device.name(), "Kitchen" );
    }
}
