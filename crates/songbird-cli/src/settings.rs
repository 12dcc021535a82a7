//! Application settings management
//!
//! Persistent settings live in `settings.json` under the user config
//! directory. Command-line flags override them; built-in defaults fill
//! whatever neither sets.

use std::fs;
use std::path::{ Path, PathBuf };
use std::time::Duration;

use serde::{ Deserialize, Serialize };

use songbird_core::CoreConfig;

use crate::cli::Args;


/// Application settings.
#[derive( Debug, Clone, PartialEq, Serialize, Deserialize )]
#[serde( default )]
pub struct Settings {
    /// Music directory to index and serve
    pub music_dir: Option<PathBuf>,

    /// Media server port
    pub http_port: Option<u16>,

    /// Host advertised to the speaker
    pub http_host: Option<String>,

    /// Address the media server binds to
    pub http_bind: Option<String>,

    /// Discovery listen window in seconds
    pub discovery_timeout_secs: u64,

    /// "Previous" restarts the track after this many seconds of playback
    pub previous_threshold_secs: u64,

    /// Volume change per key press
    pub volume_step: u8,
}


impl Default for Settings {
    fn default() -> Self {
        let core = CoreConfig::default();
        Self {
            music_dir: None,
            http_port: None,
            http_host: None,
            http_bind: None,
            discovery_timeout_secs: core.discovery_timeout.as_secs(),
            previous_threshold_secs: core.previous_threshold.as_secs(),
            volume_step: core.volume_step,
        }
    }
}


impl Settings {
    /// Returns the path to the settings file.
    fn settings_path() -> Option<PathBuf> {
        dirs::config_dir().map( |p| p.join( "songbird" ).join( "settings.json" ) )
    }


    /// Loads settings from disk, or returns defaults if not found.
    pub fn load() -> Self {
        match Self::settings_path() {
            Some( path ) => Self::load_from( &path ),
            None => Self::default(),
        }
    }


    /// Loads settings from `path`, falling back to defaults on any problem.
    pub fn load_from( path: &Path ) -> Self {
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string( path ) {
            Ok( contents ) => {
                serde_json::from_str( &contents ).unwrap_or_else( |e| {
                    tracing::warn!( "Ignoring malformed settings {}: {}", path.display(), e );
                    Self::default()
                })
            }
            Err( e ) => {
                tracing::warn!( "Failed to read settings: {}", e );
                Self::default()
            }
        }
    }


    /// Combines settings with command-line flags; flags win.
    pub fn resolve( &self, args: &Args ) -> CoreConfig {
        let defaults = CoreConfig::default();
        CoreConfig {
            music_dir: args.music_dir.clone()
                .or_else( || self.music_dir.clone() )
                .unwrap_or( defaults.music_dir ),
            http_host: args.host.clone().or_else( || self.http_host.clone() ),
            http_bind: args.bind.clone()
                .or_else( || self.http_bind.clone() )
                .unwrap_or( defaults.http_bind ),
            http_port: args.port.or( self.http_port ).unwrap_or( defaults.http_port ),
            discovery_timeout: Duration::from_secs( args.discovery_timeout.unwrap_or( self.discovery_timeout_secs ) ),
            previous_threshold: Duration::from_secs( self.previous_threshold_secs ),
            volume_step: self.volume_step,
            ..defaults
        }
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!( Settings::load_from( &dir.path().join( "settings.json" ) ), Settings::default() );
    }


    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, r#"{ "http_port": 9000, "previous_threshold_secs": 2 }"# ).unwrap();

        let settings = Settings::load_from( &path );
        assert_eq!( settings.http_port, Some( 9000 ) );
        assert_eq!( settings.previous_threshold_secs, 2 );
        assert_eq!( settings.volume_step, 5 );
    }


    #[test]
    fn test_malformed_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join( "settings.json" );
        fs::write( &path, "{ not json" ).unwrap();
        assert_eq!( Settings::load_from( &path ), Settings::default() );
    }


    #[test]
    fn test_flags_override_settings() {
        let settings = Settings {
            music_dir: Some( PathBuf::from( "/from/settings" ) ),
            http_port: Some( 9000 ),
            http_bind: Some( "127.0.0.1".into() ),
            ..Settings::default()
        };
        let args = Args {
            port: Some( 9100 ),
            discovery_timeout: Some( 1 ),
            ..Args::default()
        };

        let config = settings.resolve( &args );
        assert_eq!( config.music_dir, PathBuf::from( "/from/settings" ) );
        assert_eq!( config.http_port, 9100 );
        assert_eq!( config.http_bind, "127.0.0.1" );
        assert_eq!( config.http_host, None );
        assert_eq!( config.discovery_timeout, Duration::from_secs( 1 ) );
        assert_eq!( config.previous_threshold, Duration::from_secs( 4 ) );
    }


    #[test]
    fn test_defaults_when_nothing_set() {
        let config = Settings::default().resolve( &Args::default() );
        assert_eq!( config.http_port, songbird_core::config::DEFAULT_HTTP_PORT );
        assert_eq!( config.http_bind, songbird_core::config::DEFAULT_HTTP_BIND );
        assert_eq!( config.discovery_timeout, Duration::from_secs( 5 ) );
    }
}
