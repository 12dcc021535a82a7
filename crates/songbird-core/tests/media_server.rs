use std::fs;
use std::path::Path;

use axum::body::Body;
use axum::http::{ header, Request, StatusCode };
use http_body_util::BodyExt;
use tower::ServiceExt;
use url::Url;

use songbird_core::catalog::root_uri_prefix;
use songbird_core::media_server::{ build_router, MediaServer, MediaServerError };

const AUDIO: &[u8] = b"fLaC\x00\x00\x00\x22not really audio";


fn music_dir() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    let album = dir.path().join( "Cat Power" ).join( "Moon Pix" );
    fs::create_dir_all( &album ).unwrap();
    fs::write( album.join( "01 American Flag.flac" ), AUDIO ).unwrap();
    dir
}


async fn get( root: &Path, uri: &str ) -> axum::response::Response {
    build_router( root )
        .oneshot( Request::builder().uri( uri ).body( Body::empty() ).unwrap() )
        .await
        .unwrap()
}


async fn body_bytes( response: axum::response::Response ) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}


#[tokio::test]
async fn test_serves_file_by_relative_path() {
    let dir = music_dir();
    let response = get( dir.path(), "/Cat%20Power/Moon%20Pix/01%20American%20Flag.flac" ).await;

    assert_eq!( response.status(), StatusCode::OK );
    assert_eq!( body_bytes( response ).await, AUDIO );
}


#[tokio::test]
async fn test_indexed_path_is_fetchable() {
    let dir = music_dir();
    let file = dir.path().join( "Cat Power" ).join( "Moon Pix" ).join( "01 American Flag.flac" );

    let prefix = root_uri_prefix( dir.path() ).unwrap();
    let uri = Url::from_file_path( &file ).unwrap().to_string();
    let relative = uri.strip_prefix( &prefix ).unwrap();

    let response = get( dir.path(), relative ).await;
    assert_eq!( response.status(), StatusCode::OK );
}


#[tokio::test]
async fn test_missing_file_is_404() {
    let dir = music_dir();
    let response = get( dir.path(), "/Cat%20Power/Moon%20Pix/02.flac" ).await;
    assert_eq!( response.status(), StatusCode::NOT_FOUND );
}


#[tokio::test]
async fn test_range_request() {
    let dir = music_dir();
    let response = build_router( dir.path() )
        .oneshot(
            Request::builder()
                .uri( "/Cat%20Power/Moon%20Pix/01%20American%20Flag.flac" )
                .header( header::RANGE, "bytes=0-3" )
                .body( Body::empty() )
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!( response.status(), StatusCode::PARTIAL_CONTENT );
    assert_eq!( body_bytes( response ).await, b"fLaC" );
}


#[tokio::test]
async fn test_running_server_answers_over_tcp() {
    let dir = music_dir();
    let server = MediaServer::bind( "127.0.0.1", 0, dir.path().to_path_buf() ).await.unwrap();
    let port = server.local_port().unwrap();
    let mut handle = server.spawn();

    let url = format!( "http://127.0.0.1:{}/Cat%20Power/Moon%20Pix/01%20American%20Flag.flac", port );
    let body = tokio::task::spawn_blocking( move || {
        let mut response = ureq::get( &url ).call().unwrap();
        response.body_mut().read_to_vec().unwrap()
    }).await.unwrap();

    assert_eq!( body, AUDIO );
    handle.shutdown();
}


#[tokio::test]
async fn test_occupied_port_names_port() {
    let taken = std::net::TcpListener::bind( "127.0.0.1:0" ).unwrap();
    let port = taken.local_addr().unwrap().port();
    let dir = music_dir();

    let err = match MediaServer::bind( "127.0.0.1", port, dir.path().to_path_buf() ).await {
        Err( e ) => e,
        Ok( _ ) => panic!( "bind should fail while the port is taken" ),
    };
    assert!( matches!( err, MediaServerError::PortInUse( p ) if p == port ) );
    assert!( err.to_string().contains( &port.to_string() ) );
}
