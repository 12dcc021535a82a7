//! Startup, event routing and teardown
//!
//! The [`Orchestrator`] launches the library indexer, the media server and
//! device discovery side by side. Each reports back with a [`CoreEvent`];
//! the UI loop hands those to [`Orchestrator::handle`], which is the only
//! place presentation state changes.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::{ self, UnboundedReceiver, UnboundedSender };
use tokio::task::JoinHandle;

use crate::catalog::{ root_uri_prefix, Catalog, DirectoryCatalog };
use crate::command::PlaybackCommand;
use crate::config::CoreConfig;
use crate::controller::{ DeviceController, SharedState };
use crate::device::{ self, Device, DeviceError };
use crate::library::{ build_index, AlbumKey, LibraryError };
use crate::media_server::{ MediaEndpoint, MediaServer, MediaServerError, MediaServerHandle, MediaServerState };
use crate::now_playing;


/// Exit status when the media port is already taken.
pub const EXIT_PORT_IN_USE: i32 = 2;

/// Exit status for any other media server bind failure.
pub const EXIT_BIND_FAILED: i32 = 3;

/// Exit status when the library cannot be indexed.
pub const EXIT_LIBRARY_FAILED: i32 = 4;


/// Conditions that end the process.
#[derive( Debug, Error )]
pub enum FatalError {
    #[error( "{0}" )]
    MediaServer( #[from] MediaServerError ),

    #[error( "library indexing failed: {0}" )]
    Library( #[from] LibraryError ),
}


impl FatalError {
    /// Process exit status for this failure.
    pub fn exit_code( &self ) -> i32 {
        match self {
            FatalError::MediaServer( MediaServerError::PortInUse( _ ) ) => EXIT_PORT_IN_USE,
            FatalError::MediaServer( _ ) => EXIT_BIND_FAILED,
            FatalError::Library( _ ) => EXIT_LIBRARY_FAILED,
        }
    }
}


/// Receiver of UI-visible state changes.
pub trait Presenter {
    fn set_library_loading( &mut self, loading: bool );

    /// Replaces the album list, in display order.
    fn populate_albums( &mut self, albums: &[AlbumKey] );

    fn set_device_status( &mut self, connected: bool );

    fn set_media_status( &mut self, ready: bool );

    fn update_now_playing( &mut self, text: &str );
}


/// Results reported by background workers.
pub enum CoreEvent {
    LibraryLoaded( Vec<AlbumKey> ),
    LibraryFailed( LibraryError ),
    MediaReady( MediaServerState, MediaServerHandle ),
    MediaFailed( MediaServerError ),
    DeviceFound( String ),
    DeviceMissing,
    NowPlaying( String ),
}


/// Outcome of a discovery attempt.
pub type DiscoverResult = Result<Option<Arc<dyn Device>>, DeviceError>;

/// Looks for a device, blocking for at most the given time.
pub type DiscoverFn = Arc<dyn Fn( Duration ) -> DiscoverResult + Send + Sync>;


/// Owns the core's workers and routes events between them and the UI.
pub struct Orchestrator {
    config: CoreConfig,
    catalog: Arc<dyn Catalog>,
    discover: DiscoverFn,
    shared: Arc<SharedState>,
    controller: DeviceController,
    events: UnboundedSender<CoreEvent>,
    media_state: MediaServerState,
    media: Option<MediaServerHandle>,
    poller: Option<JoinHandle<()>>,
}


impl Orchestrator {
    /// Creates the orchestrator and the event stream the UI loop must drain.
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(
        config: CoreConfig,
        catalog: Arc<dyn Catalog>,
        discover: DiscoverFn,
    ) -> ( Self, UnboundedReceiver<CoreEvent> ) {
        let config = config.with_absolute_music_dir();
        let ( events, rx ) = mpsc::unbounded_channel();
        let shared = Arc::new( SharedState::new() );
        let controller = DeviceController::new( Arc::clone( &shared ), config.previous_threshold );
        let endpoint = MediaEndpoint::new( config.advertised_host(), config.http_port );

        let orchestrator = Self {
            media_state: MediaServerState::pending( &endpoint ),
            config,
            catalog,
            discover,
            shared,
            controller,
            events,
            media: None,
            poller: None,
        };
        ( orchestrator, rx )
    }


    /// Orchestrator for a music directory and a Sonos speaker.
    pub fn with_defaults( config: CoreConfig ) -> ( Self, UnboundedReceiver<CoreEvent> ) {
        let config = config.with_absolute_music_dir();
        let catalog = Arc::new( DirectoryCatalog::new( config.music_dir.clone() ) );
        let discover: DiscoverFn = Arc::new( |timeout: Duration| -> DiscoverResult {
            Ok( device::discover( timeout )?.map( |d| Arc::new( d ) as Arc<dyn Device> ) )
        });
        Self::new( config, catalog, discover )
    }


    /// Launches indexing, the media server and discovery concurrently.
    pub fn start( &mut self, presenter: &mut impl Presenter ) {
        presenter.set_library_loading( true );
        presenter.set_media_status( false );
        presenter.set_device_status( false );

        self.start_indexer();
        self.start_media_server();
        self.start_discovery();
    }


    fn start_indexer( &self ) {
        let catalog = Arc::clone( &self.catalog );
        let shared = Arc::clone( &self.shared );
        let events = self.events.clone();
        let root = self.config.music_dir.clone();

        tokio::task::spawn_blocking( move || {
            let result = root_uri_prefix( &root )
                .map_err( LibraryError::from )
                .and_then( |prefix| build_index( catalog.as_ref(), &prefix ) );

            let event = match result {
                Ok( index ) => {
                    let albums: Vec<AlbumKey> = index.albums().cloned().collect();
                    shared.set_library( index );
                    CoreEvent::LibraryLoaded( albums )
                }
                Err( e ) => CoreEvent::LibraryFailed( e ),
            };
            let _ = events.send( event );
        });
    }


    fn start_media_server( &self ) {
        let shared = Arc::clone( &self.shared );
        let events = self.events.clone();
        let bind = self.config.http_bind.clone();
        let port = self.config.http_port;
        let root = self.config.music_dir.clone();
        let host = self.media_state.host.clone();

        tokio::spawn( async move {
            let event = match MediaServer::bind( &bind, port, root ).await {
                Ok( server ) => {
                    let port = server.local_port().unwrap_or( port );
                    shared.set_endpoint( MediaEndpoint::new( host.clone(), port ) );
                    let handle = server.spawn();
                    CoreEvent::MediaReady( MediaServerState { host, port, ready: true }, handle )
                }
                Err( e ) => CoreEvent::MediaFailed( e ),
            };
            let _ = events.send( event );
        });
    }


    fn start_discovery( &self ) {
        let discover = Arc::clone( &self.discover );
        let shared = Arc::clone( &self.shared );
        let events = self.events.clone();
        let timeout = self.config.discovery_timeout;

        tokio::task::spawn_blocking( move || {
            let event = match discover( timeout ) {
                Ok( Some( device ) ) => {
                    let name = device.name().to_string();
                    shared.set_device( device );
                    CoreEvent::DeviceFound( name )
                }
                Ok( None ) => CoreEvent::DeviceMissing,
                Err( e ) => {
                    tracing::warn!( "Device discovery failed: {}", e );
                    CoreEvent::DeviceMissing
                }
            };
            let _ = events.send( event );
        });
    }


    /// Applies a worker result to the presentation.
    pub fn handle( &mut self, event: CoreEvent, presenter: &mut impl Presenter ) -> Result<(), FatalError> {
        match event {
            CoreEvent::LibraryLoaded( albums ) => {
                presenter.populate_albums( &albums );
                presenter.set_library_loading( false );
            }
            CoreEvent::LibraryFailed( e ) => return Err( e.into() ),
            CoreEvent::MediaReady( state, handle ) => {
                tracing::info!( "Media server ready at http://{}:{}", state.host, state.port );
                self.media_state = state;
                self.media = Some( handle );
                presenter.set_media_status( true );
            }
            CoreEvent::MediaFailed( e ) => return Err( e.into() ),
            CoreEvent::DeviceFound( name ) => {
                tracing::info!( "Using device {}", name );
                presenter.set_device_status( true );
                self.start_poller();
            }
            CoreEvent::DeviceMissing => {
                tracing::warn!( "No playback device found; restart to search again" );
                presenter.set_device_status( false );
            }
            CoreEvent::NowPlaying( text ) => presenter.update_now_playing( &text ),
        }
        Ok( () )
    }


    fn start_poller( &mut self ) {
        let Some( device ) = self.shared.device() else {
            return;
        };
        if self.poller.is_some() {
            return;
        }
        let events = self.events.clone();
        let emit = move |text: String| events.send( CoreEvent::NowPlaying( text ) ).is_ok();
        self.poller = Some( tokio::spawn( now_playing::poll( device, self.config.poll_interval, emit ) ) );
    }


    /// The user picked an album. Ignored for unknown albums or without a device.
    pub fn album_selected( &self, artist: &str, album: &str ) -> bool {
        let key = AlbumKey::new( artist, album );
        match self.shared.library() {
            Some( library ) if library.contains( &key ) => self.controller.submit( PlaybackCommand::PlayAlbum( key ) ),
            _ => {
                tracing::debug!( "Ignoring selection of unknown album {}", key );
                false
            }
        }
    }


    /// Submits a transport command.
    pub fn transport( &self, command: PlaybackCommand ) -> bool {
        self.controller.submit( command )
    }


    /// Raises (positive) or lowers (negative) the volume by whole steps.
    pub fn adjust_volume( &self, steps: i16 ) -> bool {
        let delta = steps.saturating_mul( i16::from( self.config.volume_step ) );
        self.transport( PlaybackCommand::AdjustVolume( delta ) )
    }


    pub fn media_state( &self ) -> &MediaServerState {
        &self.media_state
    }


    pub fn device_name( &self ) -> Option<String> {
        self.shared.device().map( |d| d.name().to_string() )
    }


    /// Stops polling, resets the device and stops the media server.
    pub async fn shutdown( &mut self ) {
        if let Some( poller ) = self.poller.take() {
            poller.abort();
        }
        self.controller.shutdown().await;
        if let Some( mut media ) = self.media.take() {
            media.shutdown();
        }
        tracing::info!( "Shut down" );
    }
}


#[cfg( test )]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::path::Path;

    use crate::catalog::{ CatalogError, CatalogRecord };
    use crate::controller::tests::MockDevice;


    struct FixedCatalog( Vec<CatalogRecord> );


    impl Catalog for FixedCatalog {
        fn fetch( &self ) -> Result<Vec<CatalogRecord>, CatalogError> {
            Ok( self.0.clone() )
        }
    }


    #[derive( Default )]
    struct RecordingPresenter {
        loading: Vec<bool>,
        albums: Vec<AlbumKey>,
        device: Option<bool>,
        media: Option<bool>,
        now_playing: Vec<String>,
    }


    impl Presenter for RecordingPresenter {
        fn set_library_loading( &mut self, loading: bool ) {
            self.loading.push( loading );
        }

        fn populate_albums( &mut self, albums: &[AlbumKey] ) {
            self.albums = albums.to_vec();
        }

        fn set_device_status( &mut self, connected: bool ) {
            self.device = Some( connected );
        }

        fn set_media_status( &mut self, ready: bool ) {
            self.media = Some( ready );
        }

        fn update_now_playing( &mut self, text: &str ) {
            self.now_playing.push( text.to_string() );
        }
    }


    fn config( root: &Path, port: u16 ) -> CoreConfig {
        CoreConfig {
            music_dir: root.to_path_buf(),
            http_host: Some( "127.0.0.1".into() ),
            http_bind: "127.0.0.1".into(),
            http_port: port,
            discovery_timeout: Duration::from_millis( 10 ),
            poll_interval: Duration::from_secs( 60 ),
            ..CoreConfig::default()
        }
    }


    fn catalog( root: &Path, outside: bool ) -> Arc<dyn Catalog> {
        let prefix = root_uri_prefix( root ).unwrap();
        let mut records = vec![
            CatalogRecord::new( "Low", "Trust", 2, format!( "{}/Low/Trust/02.flac", prefix ) ),
            CatalogRecord::new( "Low", "Trust", 1, format!( "{}/Low/Trust/01.flac", prefix ) ),
            CatalogRecord::new( "Cat Power", "Moon Pix", 1, format!( "{}/Cat%20Power/Moon%20Pix/01.mp3", prefix ) ),
        ];
        if outside {
            records.push( CatalogRecord::new( "X", "Y", 1, "file:///elsewhere/x.mp3" ) );
        }
        Arc::new( FixedCatalog( records ) )
    }


    fn no_device() -> DiscoverFn {
        Arc::new( |_: Duration| -> DiscoverResult { Ok( None ) } )
    }


    fn mock_device( device: &Arc<MockDevice> ) -> DiscoverFn {
        let device = Arc::clone( device );
        Arc::new( move |_: Duration| -> DiscoverResult { Ok( Some( Arc::clone( &device ) as Arc<dyn Device> ) ) } )
    }


    /// Feeds events to the orchestrator until `done` holds or a fatal error occurs.
    async fn pump(
        orchestrator: &mut Orchestrator,
        rx: &mut UnboundedReceiver<CoreEvent>,
        presenter: &mut RecordingPresenter,
        done: impl Fn( &RecordingPresenter ) -> bool,
    ) -> Result<(), FatalError> {
        let run = async {
            while !done( &*presenter ) {
                let event = rx.recv().await.unwrap();
                orchestrator.handle( event, presenter )?;
            }
            Ok::<(), FatalError>( () )
        };
        tokio::time::timeout( Duration::from_secs( 10 ), run ).await.unwrap()
    }


    #[tokio::test]
    async fn test_startup_populates_presenter() {
        let dir = tempfile::tempdir().unwrap();
        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( dir.path(), 0 ), catalog( dir.path(), false ), no_device() );
        let mut presenter = RecordingPresenter::default();

        orchestrator.start( &mut presenter );
        assert_eq!( presenter.loading, vec![ true ] );

        pump( &mut orchestrator, &mut rx, &mut presenter, |p| {
            p.loading.len() == 2 && p.media == Some( true ) && p.device.is_some()
        }).await.unwrap();

        assert_eq!( presenter.loading, vec![ true, false ] );
        assert_eq!( presenter.albums, vec![
            AlbumKey::new( "Cat Power", "Moon Pix" ),
            AlbumKey::new( "Low", "Trust" ),
        ]);
        assert_eq!( presenter.device, Some( false ) );
        assert!( orchestrator.media_state().ready );
        assert_ne!( orchestrator.media_state().port, 0 );

        orchestrator.shutdown().await;
    }


    #[tokio::test]
    async fn test_selection_without_device_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( dir.path(), 0 ), catalog( dir.path(), false ), no_device() );
        let mut presenter = RecordingPresenter::default();

        orchestrator.start( &mut presenter );
        pump( &mut orchestrator, &mut rx, &mut presenter, |p| {
            p.loading.len() == 2 && p.media.is_some() && p.device.is_some()
        }).await.unwrap();

        assert!( !orchestrator.album_selected( "Low", "Trust" ) );
        assert!( !orchestrator.transport( PlaybackCommand::Next ) );
        orchestrator.shutdown().await;
    }


    #[tokio::test]
    async fn test_selection_plays_album_on_device() {
        let dir = tempfile::tempdir().unwrap();
        let device = Arc::new( MockDevice::default() );
        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( dir.path(), 0 ), catalog( dir.path(), false ), mock_device( &device ) );
        let mut presenter = RecordingPresenter::default();

        orchestrator.start( &mut presenter );
        pump( &mut orchestrator, &mut rx, &mut presenter, |p| {
            p.loading.len() == 2 && p.media == Some( true ) && p.device == Some( true )
        }).await.unwrap();

        assert_eq!( orchestrator.device_name().as_deref(), Some( "mock" ) );
        assert!( !orchestrator.album_selected( "Low", "Unknown" ) );
        assert!( orchestrator.album_selected( "Low", "Trust" ) );

        let port = orchestrator.media_state().port;
        orchestrator.shutdown().await;

        assert_eq!( device.calls(), vec![
            "clear".to_string(),
            format!( "add http://127.0.0.1:{}/Low/Trust/01.flac", port ),
            format!( "add http://127.0.0.1:{}/Low/Trust/02.flac", port ),
            "play_from 0".to_string(),
            "stop".to_string(),
            "clear".to_string(),
        ]);
    }


    #[tokio::test]
    async fn test_relative_music_dir_loads_and_serves() {
        let cwd = std::env::current_dir().unwrap();
        let dir = tempfile::tempdir_in( &cwd ).unwrap();
        let relative = dir.path().strip_prefix( &cwd ).unwrap();
        assert!( relative.is_relative() );

        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( relative, 0 ), catalog( dir.path(), false ), no_device() );
        let mut presenter = RecordingPresenter::default();
        orchestrator.start( &mut presenter );

        pump( &mut orchestrator, &mut rx, &mut presenter, |p| {
            p.loading.len() == 2 && p.media == Some( true ) && p.device.is_some()
        }).await.unwrap();

        assert_eq!( presenter.albums.len(), 2 );
        assert!( orchestrator.media_state().ready );
        orchestrator.shutdown().await;
    }


    #[tokio::test]
    async fn test_port_in_use_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let taken = TcpListener::bind( "127.0.0.1:0" ).unwrap();
        let port = taken.local_addr().unwrap().port();

        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( dir.path(), port ), catalog( dir.path(), false ), no_device() );
        let mut presenter = RecordingPresenter::default();
        orchestrator.start( &mut presenter );

        let err = pump( &mut orchestrator, &mut rx, &mut presenter, |_| false ).await.unwrap_err();
        assert_eq!( err.exit_code(), EXIT_PORT_IN_USE );
        assert!( err.to_string().contains( &port.to_string() ) );
        orchestrator.shutdown().await;
    }


    #[tokio::test]
    async fn test_catalog_outside_root_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let ( mut orchestrator, mut rx ) = Orchestrator::new( config( dir.path(), 0 ), catalog( dir.path(), true ), no_device() );
        let mut presenter = RecordingPresenter::default();
        orchestrator.start( &mut presenter );

        let err = pump( &mut orchestrator, &mut rx, &mut presenter, |_| false ).await.unwrap_err();
        assert_eq!( err.exit_code(), EXIT_LIBRARY_FAILED );
        assert!( matches!( err, FatalError::Library( LibraryError::OutsideRoot( _ ) ) ) );
        orchestrator.shutdown().await;
    }


    #[test]
    fn test_exit_codes_are_distinct() {
        let port = FatalError::from( MediaServerError::PortInUse( 8080 ) );
        let bind = FatalError::from( MediaServerError::Bind {
            addr: "0.0.0.0:80".into(),
            source: std::io::Error::from( std::io::ErrorKind::PermissionDenied ),
        });
        let library = FatalError::from( LibraryError::OutsideRoot( "file:///x".into() ) );

        assert_eq!( port.exit_code(), 2 );
        assert_eq!( bind.exit_code(), 3 );
        assert_eq!( library.exit_code(), 4 );
        assert_eq!( port.to_string(), "could not bind to port 8080 (already in use)" );
    }
}
