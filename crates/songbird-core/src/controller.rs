//! Serialized command execution against the speaker
//!
//! The speaker's queue is shared mutable state with no transactions, so two
//! "clear / add / play" sequences must never interleave. Commands go through
//! a single-slot mailbox drained by one worker: a newer submission replaces
//! any that has not started yet, and a sequence already running notices it
//! has been superseded before its next device call and stops there.

use std::sync::atomic::{ AtomicU64, Ordering };
use std::sync::{ Arc, OnceLock };
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::command::{ adjusted_volume, previous_goes_back, PlaybackCommand };
use crate::device::{ Device, DeviceError };
use crate::library::LibraryIndex;
use crate::media_server::MediaEndpoint;


/// Results of the startup workers, each written once and read freely after.
#[derive( Default )]
pub struct SharedState {
    device: OnceLock<Arc<dyn Device>>,
    library: OnceLock<LibraryIndex>,
    endpoint: OnceLock<MediaEndpoint>,
}


impl SharedState {
    pub fn new() -> Self {
        Self::default()
    }


    pub fn device( &self ) -> Option<Arc<dyn Device>> {
        self.device.get().cloned()
    }


    /// Stores the discovered device. Returns false if one was already set.
    pub fn set_device( &self, device: Arc<dyn Device> ) -> bool {
        self.device.set( device ).is_ok()
    }


    pub fn library( &self ) -> Option<&LibraryIndex> {
        self.library.get()
    }


    pub fn set_library( &self, library: LibraryIndex ) -> bool {
        self.library.set( library ).is_ok()
    }


    pub fn endpoint( &self ) -> Option<&MediaEndpoint> {
        self.endpoint.get()
    }


    pub fn set_endpoint( &self, endpoint: MediaEndpoint ) -> bool {
        self.endpoint.set( endpoint ).is_ok()
    }
}


#[derive( Debug, Clone )]
struct Submission {
    generation: u64,
    command: PlaybackCommand,
}


/// Why a command sequence stopped early.
#[derive( Debug )]
enum Interrupted {
    Superseded,
    Device( DeviceError ),
}


impl From<DeviceError> for Interrupted {
    fn from( e: DeviceError ) -> Self {
        Interrupted::Device( e )
    }
}


/// Identity of one submission, checked before every device call.
struct Job {
    generation: u64,
    current: Arc<AtomicU64>,
}


impl Job {
    fn step<T>( &self, call: impl FnOnce() -> Result<T, DeviceError> ) -> Result<T, Interrupted> {
        if self.current.load( Ordering::SeqCst ) != self.generation {
            return Err( Interrupted::Superseded );
        }
        Ok( call()? )
    }
}


/// Runs playback commands against the device one at a time.
pub struct DeviceController {
    shared: Arc<SharedState>,
    mailbox: Option<watch::Sender<Option<Submission>>>,
    generation: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}


impl DeviceController {
    /// Starts the worker. Must be called inside a tokio runtime.
    pub fn new( shared: Arc<SharedState>, previous_threshold: Duration ) -> Self {
        let ( tx, rx ) = watch::channel( None );
        let generation = Arc::new( AtomicU64::new( 0 ) );

        let worker = tokio::spawn( run_worker(
            rx,
            Arc::clone( &shared ),
            Arc::clone( &generation ),
            previous_threshold,
        ));

        Self {
            shared,
            mailbox: Some( tx ),
            generation,
            worker: Some( worker ),
        }
    }


    /// Submits a command, superseding whatever is pending or running.
    ///
    /// Dropped silently when no device has been discovered. Returns whether
    /// the command was accepted.
    pub fn submit( &self, command: PlaybackCommand ) -> bool {
        if self.shared.device().is_none() {
            tracing::debug!( "No device; dropping {}", command );
            return false;
        }
        let Some( mailbox ) = self.mailbox.as_ref() else {
            return false;
        };

        let generation = self.generation.fetch_add( 1, Ordering::SeqCst ) + 1;
        tracing::debug!( "Submitting {} (#{})", command, generation );
        mailbox.send_replace( Some( Submission { generation, command } ) );
        true
    }


    /// Closes the mailbox, lets the in-flight command finish, then stops the
    /// device and clears its queue. Teardown failures are ignored.
    pub async fn shutdown( &mut self ) {
        self.mailbox.take();
        if let Some( worker ) = self.worker.take() {
            if let Err( e ) = worker.await {
                tracing::warn!( "Command worker failed: {}", e );
            }
        }

        let Some( device ) = self.shared.device() else {
            return;
        };
        let teardown = tokio::task::spawn_blocking( move || {
            if let Err( e ) = device.stop() {
                tracing::debug!( "Stop during teardown failed: {}", e );
            }
            if let Err( e ) = device.clear_queue() {
                tracing::debug!( "Clearing queue during teardown failed: {}", e );
            }
        });
        let _ = teardown.await;
    }
}


async fn run_worker(
    mut rx: watch::Receiver<Option<Submission>>,
    shared: Arc<SharedState>,
    generation: Arc<AtomicU64>,
    previous_threshold: Duration,
) {
    while rx.changed().await.is_ok() {
        let latest = rx.borrow_and_update().clone();
        let Some( submission ) = latest else {
            continue;
        };
        let Some( device ) = shared.device() else {
            continue;
        };

        let job = Job { generation: submission.generation, current: Arc::clone( &generation ) };
        let shared = Arc::clone( &shared );
        let command = submission.command;

        let result = tokio::task::spawn_blocking( move || {
            let outcome = execute( device.as_ref(), &shared, &job, &command, previous_threshold );
            report( &command, outcome );
        }).await;

        if let Err( e ) = result {
            tracing::error!( "Command task failed: {}", e );
        }
    }
    tracing::debug!( "Command worker stopped" );
}


fn report( command: &PlaybackCommand, outcome: Result<(), Interrupted> ) {
    match outcome {
        Ok( () ) => tracing::debug!( "Finished {}", command ),
        Err( Interrupted::Superseded ) => tracing::debug!( "Abandoned {}: superseded", command ),
        Err( Interrupted::Device( e ) ) if e.is_rejection() => tracing::debug!( "{}: {}", command, e ),
        Err( Interrupted::Device( e ) ) => tracing::warn!( "{} failed: {}", command, e ),
    }
}


fn execute(
    device: &dyn Device,
    shared: &SharedState,
    job: &Job,
    command: &PlaybackCommand,
    previous_threshold: Duration,
) -> Result<(), Interrupted> {
    match command {
        PlaybackCommand::PlayAlbum( key ) => {
            let ( Some( library ), Some( endpoint ) ) = ( shared.library(), shared.endpoint() ) else {
                tracing::warn!( "Cannot play {} before the library and media server are ready", key );
                return Ok( () );
            };
            let Some( tracks ) = library.tracks( key ) else {
                tracing::warn!( "{} is not in the library", key );
                return Ok( () );
            };
            let uris: Vec<String> = tracks.iter().map( |path| endpoint.track_url( path ) ).collect();

            job.step( || device.clear_queue() )?;
            for uri in &uris {
                job.step( || device.add_uri_to_queue( uri ) )?;
            }
            if !uris.is_empty() {
                job.step( || device.play_from_queue( 0 ) )?;
            }
            tracing::info!( "Playing {} ({} tracks) on {}", key, uris.len(), device.name() );
            Ok( () )
        }
        PlaybackCommand::Play => job.step( || device.play() ),
        PlaybackCommand::Pause => job.step( || device.pause() ),
        PlaybackCommand::Stop => job.step( || device.stop() ),
        PlaybackCommand::Next => job.step( || device.next() ),
        PlaybackCommand::Previous => {
            let info = job.step( || device.current_track_info() )?;
            if previous_goes_back( &info.position, previous_threshold ) {
                job.step( || device.previous() )
            } else {
                job.step( || device.seek( Duration::ZERO ) )
            }
        }
        PlaybackCommand::AdjustVolume( delta ) => {
            let current = job.step( || device.volume() )?;
            let volume = adjusted_volume( current, *delta );
            job.step( || device.set_volume( volume ) )
        }
    }
}


#[cfg( test )]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    use crate::catalog::CatalogRecord;
    use crate::device::TrackInfo;
    use crate::library::AlbumKey;


    /// Device double that records calls and simulates a queue.
    #[derive( Default )]
    pub struct MockDevice {
        pub calls: Mutex<Vec<String>>,
        pub queue: Mutex<Vec<String>>,
        pub position: Mutex<String>,
        pub volume: Mutex<u8>,
        pub reject_stop: bool,
    }


    impl MockDevice {
        pub fn calls( &self ) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }


        fn record( &self, call: impl Into<String> ) {
            self.calls.lock().unwrap().push( call.into() );
        }
    }


    impl Device for MockDevice {
        fn name( &self ) -> &str {
            "mock"
        }

        fn clear_queue( &self ) -> Result<(), DeviceError> {
            self.record( "clear" );
            self.queue.lock().unwrap().clear();
            Ok( () )
        }

        fn add_uri_to_queue( &self, uri: &str ) -> Result<(), DeviceError> {
            self.record( format!( "add {}", uri ) );
            self.queue.lock().unwrap().push( uri.to_string() );
            Ok( () )
        }

        fn play_from_queue( &self, index: usize ) -> Result<(), DeviceError> {
            self.record( format!( "play_from {}", index ) );
            Ok( () )
        }

        fn play( &self ) -> Result<(), DeviceError> {
            self.record( "play" );
            Ok( () )
        }

        fn pause( &self ) -> Result<(), DeviceError> {
            self.record( "pause" );
            Ok( () )
        }

        fn stop( &self ) -> Result<(), DeviceError> {
            self.record( "stop" );
            if self.reject_stop {
                return Err( DeviceError::Rejected { action: "Stop".into(), code: 701, description: None } );
            }
            Ok( () )
        }

        fn next( &self ) -> Result<(), DeviceError> {
            self.record( "next" );
            Ok( () )
        }

        fn previous( &self ) -> Result<(), DeviceError> {
            self.record( "previous" );
            Ok( () )
        }

        fn seek( &self, position: Duration ) -> Result<(), DeviceError> {
            self.record( format!( "seek {}", position.as_secs() ) );
            Ok( () )
        }

        fn current_track_info( &self ) -> Result<TrackInfo, DeviceError> {
            self.record( "track_info" );
            Ok( TrackInfo { metadata: None, position: self.position.lock().unwrap().clone() } )
        }

        fn volume( &self ) -> Result<u8, DeviceError> {
            Ok( *self.volume.lock().unwrap() )
        }

        fn set_volume( &self, volume: u8 ) -> Result<(), DeviceError> {
            self.record( format!( "volume {}", volume ) );
            *self.volume.lock().unwrap() = volume;
            Ok( () )
        }
    }


    fn shared_with( device: Option<Arc<MockDevice>> ) -> Arc<SharedState> {
        let shared = Arc::new( SharedState::new() );
        if let Some( device ) = device {
            shared.set_device( device );
        }
        let records = vec![
            CatalogRecord::new( "Low", "Trust", 2, "file:///m/Low/Trust/02.flac" ),
            CatalogRecord::new( "Low", "Trust", 1, "file:///m/Low/Trust/01.flac" ),
        ];
        shared.set_library( LibraryIndex::build( records, "file:///m" ).unwrap() );
        shared.set_endpoint( MediaEndpoint::new( "10.0.0.2", 8080 ) );
        shared
    }


    fn job() -> Job {
        Job { generation: 1, current: Arc::new( AtomicU64::new( 1 ) ) }
    }


    #[test]
    fn test_play_album_queues_urls_in_order() {
        let device = MockDevice::default();
        let shared = shared_with( None );
        let cmd = PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Trust" ) );

        execute( &device, &shared, &job(), &cmd, Duration::from_secs( 4 ) ).unwrap();

        assert_eq!( device.calls(), vec![
            "clear",
            "add http://10.0.0.2:8080/Low/Trust/01.flac",
            "add http://10.0.0.2:8080/Low/Trust/02.flac",
            "play_from 0",
        ]);
    }


    #[test]
    fn test_play_unknown_album_touches_nothing() {
        let device = MockDevice::default();
        let shared = shared_with( None );
        let cmd = PlaybackCommand::PlayAlbum( AlbumKey::new( "Low", "Nope" ) );

        execute( &device, &shared, &job(), &cmd, Duration::from_secs( 4 ) ).unwrap();
        assert!( device.calls().is_empty() );
    }


    #[test]
    fn test_previous_near_start() {
        let device = MockDevice::default();
        *device.position.lock().unwrap() = "00:00:02".into();
        let shared = shared_with( None );

        execute( &device, &shared, &job(), &PlaybackCommand::Previous, Duration::from_secs( 4 ) ).unwrap();
        assert_eq!( device.calls(), vec![ "track_info", "previous" ] );
    }


    #[test]
    fn test_previous_mid_track_seeks_to_start() {
        let device = MockDevice::default();
        *device.position.lock().unwrap() = "00:00:10".into();
        let shared = shared_with( None );

        execute( &device, &shared, &job(), &PlaybackCommand::Previous, Duration::from_secs( 4 ) ).unwrap();
        assert_eq!( device.calls(), vec![ "track_info", "seek 0" ] );
    }


    #[test]
    fn test_adjust_volume_clamps() {
        let device = MockDevice::default();
        let shared = shared_with( None );

        *device.volume.lock().unwrap() = 98;
        execute( &device, &shared, &job(), &PlaybackCommand::AdjustVolume( 5 ), Duration::from_secs( 4 ) ).unwrap();
        assert_eq!( *device.volume.lock().unwrap(), 100 );

        *device.volume.lock().unwrap() = 2;
        execute( &device, &shared, &job(), &PlaybackCommand::AdjustVolume( -5 ), Duration::from_secs( 4 ) ).unwrap();
        assert_eq!( *device.volume.lock().unwrap(), 0 );
    }


    #[test]
    fn test_superseded_job_makes_no_calls() {
        let device = MockDevice::default();
        let shared = shared_with( None );
        let stale = Job { generation: 1, current: Arc::new( AtomicU64::new( 2 ) ) };

        let result = execute( &device, &shared, &stale, &PlaybackCommand::Play, Duration::from_secs( 4 ) );
        assert!( matches!( result, Err( Interrupted::Superseded ) ) );
        assert!( device.calls().is_empty() );
    }


    #[test]
    fn test_rejection_is_reported_not_raised() {
        let device = MockDevice { reject_stop: true, ..Default::default() };
        let shared = shared_with( None );

        let result = execute( &device, &shared, &job(), &PlaybackCommand::Stop, Duration::from_secs( 4 ) );
        assert!( matches!( result, Err( Interrupted::Device( ref e ) ) if e.is_rejection() ) );
        report( &PlaybackCommand::Stop, result );
    }


    #[tokio::test]
    async fn test_submit_without_device_is_dropped() {
        let shared = shared_with( None );
        let mut controller = DeviceController::new( shared, Duration::from_secs( 4 ) );

        assert!( !controller.submit( PlaybackCommand::Play ) );
        controller.shutdown().await;
    }


    #[tokio::test]
    async fn test_shutdown_stops_and_clears() {
        let device = Arc::new( MockDevice { reject_stop: true, ..Default::default() } );
        let shared = shared_with( Some( Arc::clone( &device ) ) );
        let mut controller = DeviceController::new( shared, Duration::from_secs( 4 ) );

        assert!( controller.submit( PlaybackCommand::Pause ) );
        controller.shutdown().await;

        assert_eq!( device.calls(), vec![ "pause", "stop", "clear" ] );
        assert!( !controller.submit( PlaybackCommand::Play ) );
    }
}
