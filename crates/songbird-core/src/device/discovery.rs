//! SSDP discovery of Sonos zone players
//!
//! Sends an M-SEARCH from an ephemeral port, collects unicast replies for the
//! listen window, then reads the device description of the chosen responder.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::io;
use std::net::{ IpAddr, SocketAddr, UdpSocket };
use std::time::{ Duration, Instant };

use url::Url;

use super::{ soap, DeviceError, SonosDevice };
use crate::xml::child_texts;


const SSDP_ADDR: &str = "239.255.255.250:1900";
const ZONE_PLAYER: &str = "urn:schemas-upnp-org:device:ZonePlayer:1";

/// Stop listening this long after the first reply.
const GRACE: Duration = Duration::from_millis( 500 );


/// Finds one Sonos speaker on the local network.
///
/// Blocks for at most `timeout` plus one description fetch. Returns
/// `Ok(None)` when nothing answered. With several responders the lowest
/// address wins.
pub fn discover( timeout: Duration ) -> Result<Option<SonosDevice>, DeviceError> {
    let socket = UdpSocket::bind( "0.0.0.0:0" )?;
    socket.set_read_timeout( Some( Duration::from_millis( 200 ) ) )?;

    let request = msearch_request( ZONE_PLAYER, timeout );
    // UDP is lossy; a second copy is customary
    for _ in 0..2 {
        socket.send_to( request.as_bytes(), SSDP_ADDR )?;
    }
    tracing::debug!( "M-SEARCH sent for {}", ZONE_PLAYER );

    let responders = collect_responses( &socket, timeout )?;
    let Some(( addr, location )) = responders.into_iter().next() else {
        tracing::info!( "No Sonos device answered within {:?}", timeout );
        return Ok( None );
    };

    tracing::debug!( "Reading device description from {} ({})", location, addr );
    let agent = soap::agent();
    let mut response = agent.get( &location ).call()?;
    let description = response.body_mut().read_to_string()?;

    let ( uid, name ) = parse_description( &description )
        .ok_or_else( || DeviceError::response( "description", "missing UDN" ) )?;
    let base_url = base_url( &location )
        .ok_or_else( || DeviceError::response( "description", format!( "bad location {}", location ) ) )?;

    tracing::info!( "Found Sonos device {} at {}", name, base_url );
    Ok( Some( SonosDevice::new( base_url, uid, name ) ) )
}


fn msearch_request( search_target: &str, timeout: Duration ) -> String {
    let mx = timeout.as_secs().clamp( 1, 5 );
    format!(
        "M-SEARCH * HTTP/1.1\r\n\
         HOST: {}\r\n\
         MAN: \"ssdp:discover\"\r\n\
         MX: {}\r\n\
         ST: {}\r\n\
         \r\n",
        SSDP_ADDR, mx, search_target
    )
}


/// Reads replies until the window closes. Keyed by address so the pick is
/// deterministic.
fn collect_responses( socket: &UdpSocket, timeout: Duration ) -> io::Result<BTreeMap<IpAddr, String>> {
    let mut responders = BTreeMap::new();
    let mut deadline = Instant::now() + timeout;
    let mut buf = [ 0u8; 4096 ];

    while Instant::now() < deadline {
        match socket.recv_from( &mut buf ) {
            Ok(( n, from )) => {
                let data = String::from_utf8_lossy( &buf[ ..n ] );
                if let Some( location ) = parse_search_response( &data, ZONE_PLAYER ) {
                    if responders.is_empty() {
                        deadline = deadline.min( Instant::now() + GRACE );
                    }
                    record( &mut responders, from, location );
                }
            }
            Err( e ) if matches!( e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut ) => continue,
            Err( e ) => return Err( e ),
        }
    }

    Ok( responders )
}


fn record( responders: &mut BTreeMap<IpAddr, String>, from: SocketAddr, location: String ) {
    responders.entry( from.ip() ).or_insert( location );
}


/// Returns the LOCATION of an `HTTP/1.1 200 OK` search reply for `search_target`.
fn parse_search_response( data: &str, search_target: &str ) -> Option<String> {
    let mut lines = data.lines();
    let status = lines.next()?.trim().to_ascii_uppercase();
    if !status.starts_with( "HTTP/" ) || !status.contains( " 200" ) {
        return None;
    }

    let headers: HashMap<String, String> = lines
        .filter_map( |line| line.split_once( ':' ) )
        .map( |( k, v )| ( k.trim().to_ascii_uppercase(), v.trim().to_string() ) )
        .collect();

    if headers.get( "ST" ).map( String::as_str ) != Some( search_target ) {
        return None;
    }
    headers.get( "LOCATION" ).filter( |l| !l.is_empty() ).cloned()
}


/// Extracts `(uid, name)` from a device description document.
fn parse_description( description: &str ) -> Option<( String, String )> {
    let device = child_texts( description, "device" ).ok()??;
    let udn = device.get( "UDN" )?.trim();
    let uid = udn.strip_prefix( "uuid:" ).unwrap_or( udn ).to_string();
    if uid.is_empty() {
        return None;
    }

    let name = [ "roomName", "friendlyName" ]
        .iter()
        .filter_map( |k| device.get( *k ) )
        .map( |n| n.trim() )
        .find( |n| !n.is_empty() )
        .unwrap_or( uid.as_str() )
        .to_string();

    Some(( uid, name ))
}


fn base_url( location: &str ) -> Option<String> {
    let url = Url::parse( location ).ok()?;
    let origin = url.origin();
    origin.is_tuple().then( || origin.ascii_serialization() )
}


#[cfg( test )]
mod tests {
    use super::*;

    const REPLY: &str = "HTTP/1.1 200 OK\r\n\
        CACHE-CONTROL: max-age = 1800\r\n\
        EXT:\r\n\
        LOCATION: http://192.168.1.30:1400/xml/device_description.xml\r\n\
        SERVER: Linux UPnP/1.0 Sonos/70.3-35220 (ZPS1)\r\n\
        ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
        USN: uuid:RINCON_000E58A0123401400::urn:schemas-upnp-org:device:ZonePlayer:1\r\n\
        \r\n";


    #[test]
    fn test_msearch_request() {
        let request = msearch_request( ZONE_PLAYER, Duration::from_secs( 5 ) );
        assert!( request.starts_with( "M-SEARCH * HTTP/1.1\r\n" ) );
        assert!( request.contains( "MAN: \"ssdp:discover\"\r\n" ) );
        assert!( request.contains( "MX: 5\r\n" ) );
        assert!( request.contains( "ST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n" ) );
        assert!( request.ends_with( "\r\n\r\n" ) );
    }


    #[test]
    fn test_parse_search_response() {
        assert_eq!(
            parse_search_response( REPLY, ZONE_PLAYER ).as_deref(),
            Some( "http://192.168.1.30:1400/xml/device_description.xml" )
        );
    }


    #[test]
    fn test_parse_search_response_other_target() {
        let other = REPLY.replace( "device:ZonePlayer:1\r\nUSN", "device:MediaRenderer:1\r\nUSN" );
        assert_eq!( parse_search_response( &other, ZONE_PLAYER ), None );
    }


    #[test]
    fn test_parse_search_response_ignores_notify() {
        let notify = "NOTIFY * HTTP/1.1\r\nLOCATION: http://x/\r\nST: urn:schemas-upnp-org:device:ZonePlayer:1\r\n\r\n";
        assert_eq!( parse_search_response( notify, ZONE_PLAYER ), None );
    }


    #[test]
    fn test_parse_description() {
        let description = r#"<?xml version="1.0" encoding="utf-8" ?>
            <root xmlns="urn:schemas-upnp-org:device-1-0">
              <specVersion><major>1</major><minor>0</minor></specVersion>
              <device>
                <deviceType>urn:schemas-upnp-org:device:ZonePlayer:1</deviceType>
                <friendlyName>192.168.1.30 - Sonos One</friendlyName>
                <roomName>Kitchen</roomName>
                <UDN>uuid:RINCON_000E58A0123401400</UDN>
                <deviceList><device><UDN>uuid:RINCON_000E58A0123401400_MR</UDN></device></deviceList>
              </device>
            </root>"#;
        assert_eq!(
            parse_description( description ),
            Some(( "RINCON_000E58A0123401400".to_string(), "Kitchen".to_string() ))
        );
    }


    #[test]
    fn test_parse_description_without_udn() {
        assert_eq!( parse_description( "<root><device><roomName>Den</roomName></device></root>" ), None );
    }


    #[test]
    fn test_base_url() {
        assert_eq!(
            base_url( "http://192.168.1.30:1400/xml/device_description.xml" ).as_deref(),
            Some( "http://192.168.1.30:1400" )
        );
        assert_eq!( base_url( "not a url" ), None );
    }


    #[test]
    fn test_record_keeps_first_location_per_address() {
        let mut responders = BTreeMap::new();
        let from: SocketAddr = "192.168.1.30:1900".parse().unwrap();
        record( &mut responders, from, "http://a/".to_string() );
        record( &mut responders, from, "http://b/".to_string() );
        assert_eq!( responders.len(), 1 );
        assert_eq!( responders.values().next().map( String::as_str ), Some( "http://a/" ) );
    }
}
