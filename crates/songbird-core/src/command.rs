//! Playback commands.
//!
//! Everything the user can ask the speaker to do. Commands are submitted to
//! the [`DeviceController`](crate::controller::DeviceController), which runs
//! them one at a time.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::library::AlbumKey;


/// Errors that can occur while interpreting device-reported values.
#[derive( Debug, Error, PartialEq, Eq )]
pub enum CommandError {
    #[error( "Invalid position: {0}" )]
    InvalidPosition( String ),
}


/// A playback-mutating request.
#[derive( Debug, Clone, PartialEq, Eq )]
pub enum PlaybackCommand {
    /// Replace the queue with an album and start from its first track.
    PlayAlbum( AlbumKey ),
    Play,
    Pause,
    Stop,
    Next,
    /// Restart the current track, or go back one if it has only just begun.
    Previous,
    /// Change the volume by a signed amount.
    AdjustVolume( i16 ),
}


impl fmt::Display for PlaybackCommand {
    fn fmt( &self, f: &mut fmt::Formatter<'_> ) -> fmt::Result {
        match self {
            PlaybackCommand::PlayAlbum( key ) => write!( f, "play album {}", key ),
            PlaybackCommand::Play => write!( f, "play" ),
            PlaybackCommand::Pause => write!( f, "pause" ),
            PlaybackCommand::Stop => write!( f, "stop" ),
            PlaybackCommand::Next => write!( f, "next" ),
            PlaybackCommand::Previous => write!( f, "previous" ),
            PlaybackCommand::AdjustVolume( delta ) => write!( f, "volume {:+}", delta ),
        }
    }
}


/// Parses a transport position such as `0:01:30`, `00:01:30`, `1:30` or `90`.
pub fn parse_position( s: &str ) -> Result<Duration, CommandError> {
    let s = s.trim();
    let invalid = || CommandError::InvalidPosition( s.to_string() );

    let parts: Vec<&str> = s.split( ':' ).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err( invalid() );
    }

    let mut secs = 0u64;
    for ( i, part ) in parts.iter().enumerate() {
        if part.is_empty() || !part.bytes().all( |b| b.is_ascii_digit() ) {
            return Err( invalid() );
        }
        let value: u64 = part.parse().map_err( |_| invalid() )?;
        // Minutes and seconds fields must stay below 60 once a larger unit precedes them
        if i > 0 && value >= 60 {
            return Err( invalid() );
        }
        secs = secs.checked_mul( 60 )
            .and_then( |total| total.checked_add( value ) )
            .ok_or_else( invalid )?;
    }

    Ok( Duration::from_secs( secs ) )
}


/// Applies a volume change, clamped to `0..=100`.
pub fn adjusted_volume( current: u8, delta: i16 ) -> u8 {
    ( i16::from( current ) + delta ).clamp( 0, 100 ) as u8
}


/// Whether a "previous" press at `position` should go back a track
/// rather than restart the current one.
pub fn previous_goes_back( position: &str, threshold: Duration ) -> bool {
    match parse_position( position ) {
        Ok( pos ) => pos < threshold,
        Err( _ ) => true,
    }
}


#[cfg( test )]
mod tests {
    use super::*;

    const THRESHOLD: Duration = Duration::from_secs( 4 );


    #[test]
    fn test_parse_position_hours() {
        assert_eq!( parse_position( "0:01:30" ), Ok( Duration::from_secs( 90 ) ) );
        assert_eq!( parse_position( "01:00:05" ), Ok( Duration::from_secs( 3605 ) ) );
    }


    #[test]
    fn test_parse_position_minutes() {
        assert_eq!( parse_position( "1:30" ), Ok( Duration::from_secs( 90 ) ) );
    }


    #[test]
    fn test_parse_position_seconds() {
        assert_eq!( parse_position( "45" ), Ok( Duration::from_secs( 45 ) ) );
    }


    #[test]
    fn test_parse_position_invalid() {
        assert!( parse_position( "NOT_IMPLEMENTED" ).is_err() );
        assert!( parse_position( "" ).is_err() );
        assert!( parse_position( "1:2:3:4" ).is_err() );
        assert!( parse_position( "0:75" ).is_err() );
        assert!( parse_position( "-1" ).is_err() );
    }


    #[test]
    fn test_parse_position_overflow_is_invalid() {
        assert!( parse_position( "999999999999999999:00:00" ).is_err() );
        assert!( parse_position( "18446744073709551615:00" ).is_err() );
        assert!( previous_goes_back( "999999999999999999:00:00", THRESHOLD ) );
    }


    #[test]
    fn test_previous_near_start_goes_back() {
        assert!( previous_goes_back( "00:00:02", THRESHOLD ) );
        assert!( previous_goes_back( "0:00:03", THRESHOLD ) );
    }


    #[test]
    fn test_previous_later_restarts() {
        assert!( !previous_goes_back( "00:00:10", THRESHOLD ) );
        assert!( !previous_goes_back( "00:00:04", THRESHOLD ) );
        assert!( !previous_goes_back( "1:00:00", THRESHOLD ) );
    }


    #[test]
    fn test_previous_unknown_position_goes_back() {
        assert!( previous_goes_back( "NOT_IMPLEMENTED", THRESHOLD ) );
    }


    #[test]
    fn test_adjusted_volume_clamps() {
        assert_eq!( adjusted_volume( 98, 5 ), 100 );
        assert_eq!( adjusted_volume( 2, -5 ), 0 );
        assert_eq!( adjusted_volume( 50, 5 ), 55 );
    }


    #[test]
    fn test_display() {
        let cmd = PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Things We Lost in the Fire" ) );
        assert_eq!( cmd.to_string(), format!( "play album {}", AlbumKey::new( "Low", "Things We Lost in the Fire" ) ) );
        assert_eq!( PlaybackCommand::AdjustVolume( -5 ).to_string(), "volume -5" );
        assert_eq!( PlaybackCommand::AdjustVolume( 5 ).to_string(), "volume +5" );
    }
}
