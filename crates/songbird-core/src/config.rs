//! Runtime configuration for the playback core.

use std::net::UdpSocket;
use std::path::PathBuf;
use std::time::Duration;


/// Default port for the embedded media server.
pub const DEFAULT_HTTP_PORT: u16 = 8080;

/// Default address the media server binds to.
pub const DEFAULT_HTTP_BIND: &str = "0.0.0.0";


/// Settings the core needs to run. Built once by the binary and handed to
/// the orchestrator.
#[derive( Debug, Clone )]
pub struct CoreConfig {
    /// Root of the local music collection, served over HTTP.
    pub music_dir: PathBuf,

    /// Host advertised to the speaker in track URLs. Detected when `None`.
    pub http_host: Option<String>,

    /// Address the media server listens on.
    pub http_bind: String,

    /// Port the media server listens on.
    pub http_port: u16,

    /// How long SSDP discovery listens for replies.
    pub discovery_timeout: Duration,

    /// Period of the now-playing poller.
    pub poll_interval: Duration,

    /// Position below which "previous" jumps to the previous track instead
    /// of restarting the current one.
    pub previous_threshold: Duration,

    /// Volume change applied by a single volume up/down key press.
    pub volume_step: u8,
}


impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            music_dir: default_music_dir(),
            http_host: None,
            http_bind: DEFAULT_HTTP_BIND.to_string(),
            http_port: DEFAULT_HTTP_PORT,
            discovery_timeout: Duration::from_secs( 5 ),
            poll_interval: Duration::from_secs( 1 ),
            previous_threshold: Duration::from_secs( 4 ),
            volume_step: 5,
        }
    }
}


impl CoreConfig {
    /// Returns the host to advertise, detecting the local address if unset.
    pub fn advertised_host( &self ) -> String {
        self.http_host.clone().unwrap_or_else( local_ip )
    }


    /// Makes `music_dir` absolute against the working directory.
    ///
    /// Track URIs are `file://` URLs, which only exist for absolute paths.
    pub fn with_absolute_music_dir( mut self ) -> Self {
        match std::path::absolute( &self.music_dir ) {
            Ok( path ) => self.music_dir = path,
            Err( e ) => tracing::warn!( "Cannot make {:?} absolute: {}", self.music_dir, e ),
        }
        self
    }
}


/// Returns the user's music directory, falling back to `~/Music`.
pub fn default_music_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else( || dirs::home_dir().map( |h| h.join( "Music" ) ) )
        .unwrap_or_else( || PathBuf::from( "." ) )
}


/// Guesses the address of the interface used to reach the local network.
///
/// Connecting a UDP socket sends nothing; it only asks the OS to pick a
/// route, whose source address is what the speaker will be able to reach.
pub fn local_ip() -> String {
    let probe = || -> std::io::Result<String> {
        let socket = UdpSocket::bind( "0.0.0.0:0" )?;
        socket.connect( "1.1.1.1:53" )?;
        Ok( socket.local_addr()?.ip().to_string() )
    };

    probe().unwrap_or_else( |e| {
        tracing::warn!( "Could not detect local address, using loopback: {}", e );
        "127.0.0.1".to_string()
    })
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_defaults() {
        let config = CoreConfig::default();
        assert_eq!( config.http_port, 8080 );
        assert_eq!( config.http_bind, "0.0.0.0" );
        assert_eq!( config.previous_threshold, Duration::from_secs( 4 ) );
        assert_eq!( config.poll_interval, Duration::from_secs( 1 ) );
        assert_eq!( config.volume_step, 5 );
    }


    #[test]
    fn test_explicit_host_wins() {
        let config = CoreConfig {
            http_host: Some( "10.0.0.7".to_string() ),
            ..CoreConfig::default()
        };
        assert_eq!( config.advertised_host(), "10.0.0.7" );
    }


    #[test]
    fn test_relative_music_dir_made_absolute() {
        let config = CoreConfig {
            music_dir: PathBuf::from( "music" ),
            ..CoreConfig::default()
        }.with_absolute_music_dir();

        assert!( config.music_dir.is_absolute() );
        assert_eq!( config.music_dir, std::env::current_dir().unwrap().join( "music" ) );
    }


    #[test]
    fn test_absolute_music_dir_unchanged() {
        let root = std::env::temp_dir().join( "songbird-music" );
        let config = CoreConfig { music_dir: root.clone(), ..CoreConfig::default() }.with_absolute_music_dir();
        assert_eq!( config.music_dir, root );
    }
}
