//! Playback device access
//!
//! [`Device`] is the narrow surface the controller needs from a speaker.
//! The bundled implementation speaks UPnP to Sonos zone players.

pub mod discovery;
pub mod soap;
pub mod sonos;

use std::time::Duration;

use thiserror::Error;

pub use discovery::discover;
pub use sonos::SonosDevice;


/// Errors reported by a device.
#[derive( Debug, Error )]
pub enum DeviceError {
    /// The device understood the request and refused it, e.g. "stop" while
    /// already stopped.
    #[error( "{action} rejected by device (UPnP error {code})" )]
    Rejected {
        action: String,
        code: u32,
        description: Option<String>,
    },

    #[error( "HTTP error: {0}" )]
    Http( #[from] ureq::Error ),

    #[error( "Malformed response to {action}: {reason}" )]
    Response {
        action: String,
        reason: String,
    },

    #[error( "Network error: {0}" )]
    Io( #[from] std::io::Error ),
}


impl DeviceError {
    /// True for protocol-level refusals, which are not actionable.
    pub fn is_rejection( &self ) -> bool {
        matches!( self, DeviceError::Rejected { .. } )
    }


    pub(crate) fn response( action: &str, reason: impl Into<String> ) -> Self {
        DeviceError::Response { action: action.to_string(), reason: reason.into() }
    }
}


/// Snapshot of the track the device has loaded.
#[derive( Debug, Clone, Default, PartialEq, Eq )]
pub struct TrackInfo {
    /// DIDL-Lite document describing the track, if any.
    pub metadata: Option<String>,

    /// Position within the track as reported by the device (`H:MM:SS`).
    pub position: String,
}


/// A networked speaker.
///
/// All calls block on network I/O and must be made off the UI loop.
pub trait Device: Send + Sync {
    /// Human-readable name, e.g. the room.
    fn name( &self ) -> &str;

    fn clear_queue( &self ) -> Result<(), DeviceError>;

    fn add_uri_to_queue( &self, uri: &str ) -> Result<(), DeviceError>;

    /// Starts playing the queue from the zero-based `index`.
    fn play_from_queue( &self, index: usize ) -> Result<(), DeviceError>;

    fn play( &self ) -> Result<(), DeviceError>;

    fn pause( &self ) -> Result<(), DeviceError>;

    fn stop( &self ) -> Result<(), DeviceError>;

    fn next( &self ) -> Result<(), DeviceError>;

    fn previous( &self ) -> Result<(), DeviceError>;

    /// Seeks within the current track.
    fn seek( &self, position: Duration ) -> Result<(), DeviceError>;

    fn current_track_info( &self ) -> Result<TrackInfo, DeviceError>;

    /// Volume in `0..=100`.
    fn volume( &self ) -> Result<u8, DeviceError>;

    fn set_volume( &self, volume: u8 ) -> Result<(), DeviceError>;
}
