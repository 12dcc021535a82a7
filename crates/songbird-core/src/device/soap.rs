//! UPnP SOAP action calls.

use std::collections::HashMap;
use std::time::Duration;

use quick_xml::escape::escape;
use ureq::Agent;

use super::DeviceError;
use crate::xml::child_texts;


/// Timeout for a single device request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs( 10 );


/// Output arguments of a successful action, keyed by argument name.
#[derive( Debug, Default )]
pub struct ActionResponse {
    values: HashMap<String, String>,
}


impl ActionResponse {
    pub fn get( &self, name: &str ) -> Option<&str> {
        self.values.get( name ).map( String::as_str )
    }


    /// Gets a required argument.
    pub fn require( &self, action: &str, name: &str ) -> Result<&str, DeviceError> {
        self.get( name )
            .ok_or_else( || DeviceError::response( action, format!( "missing {}", name ) ) )
    }
}


/// Builds an HTTP agent suitable for SOAP calls.
///
/// 4xx/5xx are not turned into errors because UPnP faults arrive as HTTP 500
/// with a body we need to read.
pub fn agent() -> Agent {
    Agent::config_builder()
        .http_status_as_error( false )
        .timeout_global( Some( REQUEST_TIMEOUT ) )
        .build()
        .into()
}


/// Builds the SOAP envelope for an action.
pub fn build_request( service_type: &str, action: &str, args: &[( &str, &str )] ) -> String {
    let mut body = String::new();
    for ( name, value ) in args {
        body.push_str( &format!( "<{name}>{}</{name}>", escape( *value ) ) );
    }

    format!(
        concat!(
            r#"<?xml version="1.0" encoding="utf-8"?>"#,
            r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/" "#,
            r#"s:encodingStyle="http://schemas.xmlsoap.org/soap/encoding/">"#,
            r#"<s:Body><u:{action} xmlns:u="{service}">{body}</u:{action}></s:Body>"#,
            r#"</s:Envelope>"#,
        ),
        action = action,
        service = service_type,
        body = body,
    )
}


/// Interprets a SOAP reply body.
pub fn parse_response( action: &str, success: bool, status: u16, body: &str ) -> Result<ActionResponse, DeviceError> {
    let xml_error = |e: quick_xml::Error| DeviceError::response( action, e.to_string() );

    if !success {
        return match child_texts( body, "UPnPError" ).map_err( xml_error )? {
            Some( fault ) => {
                let code = fault.get( "errorCode" )
                    .and_then( |c| c.trim().parse().ok() )
                    .unwrap_or( 0 );
                Err( DeviceError::Rejected {
                    action: action.to_string(),
                    code,
                    description: fault.get( "errorDescription" ).cloned(),
                })
            }
            None => Err( DeviceError::response( action, format!( "HTTP status {}", status ) ) ),
        };
    }

    let response_name = format!( "{}Response", action );
    let values = child_texts( body, &response_name )
        .map_err( xml_error )?
        .ok_or_else( || DeviceError::response( action, format!( "missing {}", response_name ) ) )?;

    Ok( ActionResponse { values } )
}


/// Invokes `action` on the service at `control_url`.
pub fn invoke(
    agent: &Agent,
    control_url: &str,
    service_type: &str,
    action: &str,
    args: &[( &str, &str )],
) -> Result<ActionResponse, DeviceError> {
    tracing::debug!( "SOAP {} -> {}", action, control_url );

    let soap_action = format!( r#""{}#{}""#, service_type, action );
    let mut response = agent
        .post( control_url )
        .header( "Content-Type", r#"text/xml; charset="utf-8""# )
        .header( "SOAPAction", &soap_action )
        .send( build_request( service_type, action, args ) )?;

    let status = response.status();
    let body = response.body_mut().read_to_string()?;

    parse_response( action, status.is_success(), status.as_u16(), &body )
}


#[cfg( test )]
mod tests {
    use super::*;

    const AVT: &str = "urn:schemas-upnp-org:service:AVTransport:1";


    #[test]
    fn test_build_request_escapes_arguments() {
        let xml = build_request( AVT, "AddURIToQueue", &[
            ( "InstanceID", "0" ),
            ( "EnqueuedURI", "http://h:8080/A&B/01.flac" ),
        ]);
        assert!( xml.contains( r#"<u:AddURIToQueue xmlns:u="urn:schemas-upnp-org:service:AVTransport:1">"# ) );
        assert!( xml.contains( "<InstanceID>0</InstanceID>" ) );
        assert!( xml.contains( "<EnqueuedURI>http://h:8080/A&amp;B/01.flac</EnqueuedURI>" ) );
    }


    #[test]
    fn test_parse_success() {
        let body = r#"<?xml version="1.0"?>
            <s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
            <u:GetVolumeResponse xmlns:u="urn:schemas-upnp-org:service:RenderingControl:1">
            <CurrentVolume>42</CurrentVolume></u:GetVolumeResponse></s:Body></s:Envelope>"#;
        let response = parse_response( "GetVolume", true, 200, body ).unwrap();
        assert_eq!( response.get( "CurrentVolume" ), Some( "42" ) );
        assert!( response.require( "GetVolume", "Missing" ).is_err() );
    }


    #[test]
    fn test_parse_fault_is_rejection() {
        let body = r#"<s:Envelope xmlns:s="http://schemas.xmlsoap.org/soap/envelope/"><s:Body>
            <s:Fault><faultcode>s:Client</faultcode><faultstring>UPnPError</faultstring>
            <detail><UPnPError xmlns="urn:schemas-upnp-org:control-1-0">
            <errorCode>701</errorCode></UPnPError></detail></s:Fault></s:Body></s:Envelope>"#;
        let err = parse_response( "Stop", false, 500, body ).unwrap_err();
        assert!( err.is_rejection() );
        assert!( matches!( err, DeviceError::Rejected { code: 701, .. } ) );
    }


    #[test]
    fn test_parse_error_without_fault() {
        let err = parse_response( "Play", false, 404, "not found" ).unwrap_err();
        assert!( !err.is_rejection() );
    }


    #[test]
    fn test_parse_missing_response_element() {
        let body = "<s:Envelope><s:Body></s:Body></s:Envelope>";
        assert!( parse_response( "Play", true, 200, body ).is_err() );
    }
}
