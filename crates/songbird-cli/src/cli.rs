//! Command-line argument parsing for Songbird.

use std::path::PathBuf;

use clap::Parser;


/// Songbird - play albums from your music folder on a Sonos speaker.
#[derive( Parser, Debug, Default )]
#[command( name = "songbird" )]
#[command( version, about, long_about = None )]
pub struct Args {
    /// Music directory to index and serve.
    #[arg( short, long )]
    pub music_dir: Option<PathBuf>,

    /// Port for the embedded media server.
    #[arg( short, long )]
    pub port: Option<u16>,

    /// Address the speaker should use to reach this machine.
    #[arg( long )]
    pub host: Option<String>,

    /// Address the media server listens on.
    #[arg( long )]
    pub bind: Option<String>,

    /// Seconds to wait for a speaker to answer discovery.
    #[arg( long, value_name = "SECS" )]
    pub discovery_timeout: Option<u64>,
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "songbird", "--music-dir", "/srv/music", "-p", "9000", "--host", "192.168.1.20", "--discovery-timeout", "2",
        ]);
        assert_eq!( args.music_dir, Some( PathBuf::from( "/srv/music" ) ) );
        assert_eq!( args.port, Some( 9000 ) );
        assert_eq!( args.host.as_deref(), Some( "192.168.1.20" ) );
        assert_eq!( args.bind, None );
        assert_eq!( args.discovery_timeout, Some( 2 ) );
    }


    #[test]
    fn test_parse_rejects_bad_port() {
        assert!( Args::try_parse_from([ "songbird", "--port", "99999" ]).is_err() );
    }
}
