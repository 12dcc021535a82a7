use std::sync::atomic::{ AtomicUsize, Ordering };
use std::sync::{ Arc, Mutex };
use std::time::Duration;

use songbird_core::catalog::CatalogRecord;
use songbird_core::controller::{ DeviceController, SharedState };
use songbird_core::device::{ Device, DeviceError, TrackInfo };
use songbird_core::library::{ AlbumKey, LibraryIndex };
use songbird_core::media_server::MediaEndpoint;
use songbird_core::PlaybackCommand;

const THRESHOLD: Duration = Duration::from_secs( 4 );


/// Device whose calls take a while, tracking how many run at once.
struct SlowDevice {
    delay: Duration,
    active: AtomicUsize,
    max_active: AtomicUsize,
    calls: AtomicUsize,
    queue: Mutex<Vec<String>>,
    /// Queue contents each time playback was started from it.
    played: Mutex<Vec<Vec<String>>>,
}


impl SlowDevice {
    fn new( delay: Duration ) -> Self {
        Self {
            delay,
            active: AtomicUsize::new( 0 ),
            max_active: AtomicUsize::new( 0 ),
            calls: AtomicUsize::new( 0 ),
            queue: Mutex::new( Vec::new() ),
            played: Mutex::new( Vec::new() ),
        }
    }


    fn call<T>( &self, f: impl FnOnce() -> T ) -> Result<T, DeviceError> {
        let now = self.active.fetch_add( 1, Ordering::SeqCst ) + 1;
        self.max_active.fetch_max( now, Ordering::SeqCst );
        self.calls.fetch_add( 1, Ordering::SeqCst );
        std::thread::sleep( self.delay );
        let result = f();
        self.active.fetch_sub( 1, Ordering::SeqCst );
        Ok( result )
    }
}


impl Device for SlowDevice {
    fn name( &self ) -> &str {
        "slow"
    }

    fn clear_queue( &self ) -> Result<(), DeviceError> {
        self.call( || self.queue.lock().unwrap().clear() )
    }

    fn add_uri_to_queue( &self, uri: &str ) -> Result<(), DeviceError> {
        self.call( || self.queue.lock().unwrap().push( uri.to_string() ) )
    }

    fn play_from_queue( &self, _index: usize ) -> Result<(), DeviceError> {
        self.call( || {
            let snapshot = self.queue.lock().unwrap().clone();
            self.played.lock().unwrap().push( snapshot );
        })
    }

    fn play( &self ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn pause( &self ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn stop( &self ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn next( &self ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn previous( &self ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn seek( &self, _position: Duration ) -> Result<(), DeviceError> {
        self.call( || () )
    }

    fn current_track_info( &self ) -> Result<TrackInfo, DeviceError> {
        self.call( || TrackInfo { metadata: None, position: "0:00:30".into() } )
    }

    fn volume( &self ) -> Result<u8, DeviceError> {
        self.call( || 50 )
    }

    fn set_volume( &self, _volume: u8 ) -> Result<(), DeviceError> {
        self.call( || () )
    }
}


fn shared( device: &Arc<SlowDevice> ) -> Arc<SharedState> {
    let records = vec![
        CatalogRecord::new( "Low", "Trust", 1, "file:///m/Low/Trust/01.flac" ),
        CatalogRecord::new( "Low", "Trust", 2, "file:///m/Low/Trust/02.flac" ),
        CatalogRecord::new( "Low", "Trust", 3, "file:///m/Low/Trust/03.flac" ),
        CatalogRecord::new( "Low", "Secret Name", 1, "file:///m/Low/Secret%20Name/01.flac" ),
        CatalogRecord::new( "Low", "Secret Name", 2, "file:///m/Low/Secret%20Name/02.flac" ),
    ];

    let shared = Arc::new( SharedState::new() );
    shared.set_library( LibraryIndex::build( records, "file:///m" ).unwrap() );
    shared.set_endpoint( MediaEndpoint::new( "10.0.0.2", 8080 ) );
    shared.set_device( Arc::clone( device ) as Arc<dyn Device> );
    shared
}


fn secret_name_urls() -> Vec<String> {
    vec![
        "http://10.0.0.2:8080/Low/Secret%20Name/01.flac".to_string(),
        "http://10.0.0.2:8080/Low/Secret%20Name/02.flac".to_string(),
    ]
}


async fn wait_for_calls( device: &SlowDevice, count: usize ) {
    while device.calls.load( Ordering::SeqCst ) < count {
        tokio::time::sleep( Duration::from_millis( 1 ) ).await;
    }
}


#[tokio::test]
async fn test_superseding_album_abandons_running_one() {
    let device = Arc::new( SlowDevice::new( Duration::from_millis( 30 ) ) );
    let mut controller = DeviceController::new( shared( &device ), THRESHOLD );

    assert!( controller.submit( PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Trust" ) ) ) );
    wait_for_calls( &device, 1 ).await;
    assert!( controller.submit( PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Secret Name" ) ) ) );

    controller.shutdown().await;

    assert_eq!( device.max_active.load( Ordering::SeqCst ), 1 );
    let played = device.played.lock().unwrap().clone();
    assert_eq!( played, vec![ secret_name_urls() ] );
}


#[tokio::test]
async fn test_burst_of_commands_never_overlaps() {
    let device = Arc::new( SlowDevice::new( Duration::from_millis( 5 ) ) );
    let mut controller = DeviceController::new( shared( &device ), THRESHOLD );

    for _ in 0..5 {
        controller.submit( PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Trust" ) ) );
        controller.submit( PlaybackCommand::Next );
        controller.submit( PlaybackCommand::AdjustVolume( 5 ) );
        controller.submit( PlaybackCommand::Previous );
        tokio::time::sleep( Duration::from_millis( 3 ) ).await;
    }
    controller.submit( PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Secret Name" ) ) );

    controller.shutdown().await;

    assert_eq!( device.max_active.load( Ordering::SeqCst ), 1 );
    let played = device.played.lock().unwrap().clone();
    assert_eq!( played.last(), Some( &secret_name_urls() ) );
}


#[tokio::test]
async fn test_commands_before_device_do_nothing() {
    let device = Arc::new( SlowDevice::new( Duration::ZERO ) );
    let shared = Arc::new( SharedState::new() );
    let mut controller = DeviceController::new( Arc::clone( &shared ), THRESHOLD );

    assert!( !controller.submit( PlaybackCommand::Play ) );
    assert!( !controller.submit( PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Trust" ) ) ) );
    controller.shutdown().await;

    assert_eq!( device.calls.load( Ordering::SeqCst ), 0 );
}
