//! Presentation state for the TUI.
//!
//! [`UiState`] receives updates from the core and holds everything the
//! draw functions read.

use ratatui::widgets::TableState;

use songbird_core::{ AlbumKey, Presenter };


/// Placeholder shown until the speaker reports a track.
pub const NOTHING_PLAYING: &str = "No music selected";


/// Current view mode of the application.
#[derive( Debug, Clone, Copy, PartialEq, Eq, Default )]
pub enum ViewMode {
    /// Album list - the main view.
    #[default]
    Albums,

    /// Help overlay - shows key bindings.
    Help,
}


/// What the screen shows.
#[derive( Debug )]
pub struct UiState {
    pub view_mode: ViewMode,
    pub albums: Vec<AlbumKey>,
    pub album_state: TableState,
    pub library_loading: bool,
    pub device_connected: bool,
    pub media_ready: bool,
    pub now_playing: String,
}


impl Default for UiState {
    fn default() -> Self {
        Self {
            view_mode: ViewMode::Albums,
            albums: Vec::new(),
            album_state: TableState::default(),
            library_loading: false,
            device_connected: false,
            media_ready: false,
            now_playing: NOTHING_PLAYING.to_string(),
        }
    }
}


impl UiState {
    pub fn new() -> Self {
        Self::default()
    }


    /// The highlighted album.
    pub fn selected_album( &self ) -> Option<&AlbumKey> {
        self.album_state.selected().and_then( |i| self.albums.get( i ) )
    }


    pub fn select_next( &mut self ) {
        if self.albums.is_empty() {
            return;
        }
        let next = match self.album_state.selected() {
            Some( i ) => ( i + 1 ).min( self.albums.len() - 1 ),
            None => 0,
        };
        self.album_state.select( Some( next ) );
    }


    pub fn select_previous( &mut self ) {
        if self.albums.is_empty() {
            return;
        }
        let prev = self.album_state.selected().map_or( 0, |i| i.saturating_sub( 1 ) );
        self.album_state.select( Some( prev ) );
    }


    /// Opens the help overlay. Ignored while the library is still loading.
    pub fn show_help( &mut self ) {
        if !self.library_loading {
            self.view_mode = ViewMode::Help;
        }
    }
}


impl Presenter for UiState {
    fn set_library_loading( &mut self, loading: bool ) {
        self.library_loading = loading;
    }


    fn populate_albums( &mut self, albums: &[AlbumKey] ) {
        self.albums = albums.to_vec();
        // The list takes focus once loaded
        self.album_state.select( if self.albums.is_empty() { None } else { Some( 0 ) } );
    }


    fn set_device_status( &mut self, connected: bool ) {
        self.device_connected = connected;
    }


    fn set_media_status( &mut self, ready: bool ) {
        self.media_ready = ready;
    }


    fn update_now_playing( &mut self, text: &str ) {
        self.now_playing = text.to_string();
    }
}


#[cfg( test )]
mod tests {
    use super::*;


    fn loaded() -> UiState {
        let mut ui = UiState::new();
        ui.populate_albums( &[
            AlbumKey::new( "Cat Power", "Moon Pix" ),
            AlbumKey::new( "Low", "Trust" ),
        ]);
        ui
    }


    #[test]
    fn test_initial_state() {
        let ui = UiState::new();
        assert_eq!( ui.now_playing, "No music selected" );
        assert_eq!( ui.selected_album(), None );
    }


    #[test]
    fn test_populate_selects_first() {
        let ui = loaded();
        assert_eq!( ui.selected_album(), Some( &AlbumKey::new( "Cat Power", "Moon Pix" ) ) );
    }


    #[test]
    fn test_cursor_stays_in_bounds() {
        let mut ui = loaded();
        ui.select_previous();
        assert_eq!( ui.album_state.selected(), Some( 0 ) );
        ui.select_next();
        ui.select_next();
        assert_eq!( ui.album_state.selected(), Some( 1 ) );
    }


    #[test]
    fn test_help_ignored_while_loading() {
        let mut ui = UiState::new();
        ui.set_library_loading( true );
        ui.show_help();
        assert_eq!( ui.view_mode, ViewMode::Albums );

        ui.set_library_loading( false );
        ui.show_help();
        assert_eq!( ui.view_mode, ViewMode::Help );
    }


    #[test]
    fn test_now_playing_update() {
        let mut ui = UiState::new();
        ui.update_now_playing( "Song\nArtist · Album" );
        assert_eq!( ui.now_playing, "Song\nArtist · Album" );
    }
}
