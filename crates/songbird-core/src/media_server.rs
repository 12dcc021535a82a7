//! Embedded HTTP server exposing the music directory to the speaker
//!
//! The speaker cannot read the controller's filesystem, so every queued
//! track is fetched back from here as `GET /{relative-path}`.

use std::io;
use std::path::{ Path, PathBuf };

use axum::Router;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;


/// Errors that can occur while starting the media server.
#[derive( Debug, Error )]
pub enum MediaServerError {
    #[error( "could not bind to port {0} (already in use)" )]
    PortInUse( u16 ),

    #[error( "could not bind to {addr}: {source}" )]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error( "media server stopped: {0}" )]
    Serve( io::Error ),
}


/// Where the speaker can reach the media server.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct MediaEndpoint {
    pub host: String,
    pub port: u16,
}


impl MediaEndpoint {
    pub fn new( host: impl Into<String>, port: u16 ) -> Self {
        Self { host: host.into(), port }
    }


    /// Builds the URL the speaker fetches for a server-relative path.
    pub fn track_url( &self, path: &str ) -> String {
        format!( "http://{}:{}{}", self.host, self.port, path )
    }
}


/// Observable state of the media server.
#[derive( Debug, Clone, PartialEq, Eq )]
pub struct MediaServerState {
    pub host: String,
    pub port: u16,
    pub ready: bool,
}


impl MediaServerState {
    /// State before the bind has completed.
    pub fn pending( endpoint: &MediaEndpoint ) -> Self {
        Self {
            host: endpoint.host.clone(),
            port: endpoint.port,
            ready: false,
        }
    }
}


/// Builds the router serving `root` as a static file tree at `/`.
pub fn build_router( root: &Path ) -> Router {
    Router::new()
        .fallback_service( ServeDir::new( root ) )
        .layer( TraceLayer::new_for_http() )
}


/// A bound, not yet running, media server.
pub struct MediaServer {
    listener: TcpListener,
    root: PathBuf,
}


/// Stops a running media server.
pub struct MediaServerHandle {
    shutdown_tx: Option<oneshot::Sender<()>>,
}


impl MediaServer {
    /// Binds the listening socket.
    pub async fn bind( bind_host: &str, port: u16, root: PathBuf ) -> Result<Self, MediaServerError> {
        let addr = format!( "{}:{}", bind_host, port );
        let listener = TcpListener::bind( &addr ).await.map_err( |e| {
            if e.kind() == io::ErrorKind::AddrInUse {
                MediaServerError::PortInUse( port )
            } else {
                MediaServerError::Bind { addr: addr.clone(), source: e }
            }
        })?;

        tracing::info!( "Media server serving {:?} on http://{}", root, addr );
        Ok( Self { listener, root } )
    }


    /// Port actually bound, useful when binding port 0.
    pub fn local_port( &self ) -> Option<u16> {
        self.listener.local_addr().ok().map( |a| a.port() )
    }


    /// Starts serving in a background task.
    pub fn spawn( self ) -> MediaServerHandle {
        let ( shutdown_tx, shutdown_rx ) = oneshot::channel::<()>();
        let app = build_router( &self.root );

        tokio::spawn( async move {
            let result = axum::serve( self.listener, app )
                .with_graceful_shutdown( async move { let _ = shutdown_rx.await; } )
                .await;

            if let Err( e ) = result {
                tracing::error!( "{}", MediaServerError::Serve( e ) );
            }
            tracing::debug!( "Media server stopped" );
        });

        MediaServerHandle { shutdown_tx: Some( shutdown_tx ) }
    }
}


impl MediaServerHandle {
    /// Requests a graceful shutdown; in-flight transfers are allowed to finish.
    pub fn shutdown( &mut self ) {
        if let Some( tx ) = self.shutdown_tx.take() {
            let _ = tx.send( () );
        }
    }
}


impl Drop for MediaServerHandle {
    fn drop( &mut self ) {
        self.shutdown();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_track_url() {
        let endpoint = MediaEndpoint::new( "192.168.1.20", 8080 );
        assert_eq!(
            endpoint.track_url( "/Low/Things%20We%20Lost/01.flac" ),
            "http://192.168.1.20:8080/Low/Things%20We%20Lost/01.flac"
        );
    }


    #[test]
    fn test_port_in_use_message_names_port() {
        let err = MediaServerError::PortInUse( 8080 );
        assert_eq!( err.to_string(), "could not bind to port 8080 (already in use)" );
    }


    #[tokio::test]
    async fn test_second_bind_reports_port_in_use() {
        let dir = tempfile::tempdir().unwrap();
        let first = MediaServer::bind( "127.0.0.1", 0, dir.path().to_path_buf() ).await.unwrap();
        let port = first.local_port().unwrap();

        let second = MediaServer::bind( "127.0.0.1", port, dir.path().to_path_buf() ).await;
        assert!( matches!( second, Err( MediaServerError::PortInUse( p ) ) if p == port ) );
    }


    #[tokio::test]
    async fn test_bad_address_is_bind_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = MediaServer::bind( "not an address", 8080, dir.path().to_path_buf() ).await;
        assert!( matches!( result, Err( MediaServerError::Bind { .. } ) ) );
    }
}
