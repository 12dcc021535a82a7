//! Songbird CLI - Terminal UI for playing albums on a networked speaker

mod cli;
mod input;
mod settings;
mod view;

use std::fs::{ self, File };
use std::io;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::{
    event::{ self, Event, KeyCode, KeyEventKind, KeyModifiers },
    terminal::{ disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen },
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{ Block, Borders, Cell, Clear, Paragraph, Row, Table, Wrap },
};
use tokio::sync::mpsc::UnboundedReceiver;
use tracing_subscriber::EnvFilter;

use cli::Args;
use input::Action;
use settings::Settings;
use view::{ UiState, ViewMode };

use songbird_core::{ CoreConfig, CoreEvent, FatalError, Orchestrator };


/// Application state.
struct App {
    orchestrator: Orchestrator,
    events: UnboundedReceiver<CoreEvent>,
    ui: UiState,
    should_quit: bool,
}


impl App {
    /// Creates the app and starts the core workers.
    fn new( config: CoreConfig ) -> Self {
        let ( mut orchestrator, events ) = Orchestrator::with_defaults( config );
        let mut ui = UiState::new();
        orchestrator.start( &mut ui );

        Self {
            orchestrator,
            events,
            ui,
            should_quit: false,
        }
    }


    /// Applies pending core events.
    fn tick( &mut self ) -> Result<(), FatalError> {
        while let Ok( event ) = self.events.try_recv() {
            self.orchestrator.handle( event, &mut self.ui )?;
        }
        Ok( () )
    }


    /// Handles a key press.
    fn handle_key( &mut self, code: KeyCode, modifiers: KeyModifiers ) {
        let action = Action::from_key( code, modifiers );

        // Any key closes the help overlay; quitting still works from there
        if self.ui.view_mode == ViewMode::Help {
            if action == Some( Action::Quit ) {
                self.should_quit = true;
            }
            self.ui.view_mode = ViewMode::Albums;
            return;
        }

        let Some( action ) = action else {
            return;
        };

        match action {
            Action::Quit => self.should_quit = true,
            Action::CursorUp => self.ui.select_previous(),
            Action::CursorDown => self.ui.select_next(),
            Action::Select => {
                if let Some( key ) = self.ui.selected_album() {
                    self.orchestrator.album_selected( &key.artist, &key.album );
                }
            }
            Action::VolumeUp => {
                self.orchestrator.adjust_volume( 1 );
            }
            Action::VolumeDown => {
                self.orchestrator.adjust_volume( -1 );
            }
            Action::Help => self.ui.show_help(),
            transport => {
                if let Some( command ) = transport.transport() {
                    self.orchestrator.transport( command );
                }
            }
        }
    }
}


/// Sends logs to a file in the cache directory; the terminal belongs to the UI.
fn init_logging() {
    let Some( dir ) = dirs::cache_dir().map( |d| d.join( "songbird" ) ) else {
        return;
    };
    if fs::create_dir_all( &dir ).is_err() {
        return;
    }
    let Ok( file ) = File::create( dir.join( "songbird.log" ) ) else {
        return;
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env( "SONGBIRD_LOG" ).unwrap_or_else( |_| EnvFilter::new( "info" ) )
        )
        .with_writer( Mutex::new( file ) )
        .with_ansi( false )
        .init();
}


/// Runs the UI until the user quits or a fatal error occurs.
async fn run( terminal: &mut Terminal<CrosstermBackend<io::Stdout>>, config: CoreConfig ) -> Result<Option<FatalError>> {
    let mut app = App::new( config );

    loop {
        // Update state
        if let Err( fatal ) = app.tick() {
            app.orchestrator.shutdown().await;
            return Ok( Some( fatal ) );
        }

        // Draw UI
        terminal.draw( |frame| draw_ui( frame, &mut app ) )?;

        // Handle events with timeout
        if event::poll( Duration::from_millis( 100 ) )? {
            if let Event::Key( key ) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    app.handle_key( key.code, key.modifiers );
                }
            }
        }

        if app.should_quit {
            break;
        }
    }

    app.orchestrator.shutdown().await;
    Ok( None )
}


#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();

    let config = Settings::load().resolve( &args );
    tracing::info!( "Starting with music directory {:?}", config.music_dir );

    // Setup terminal
    enable_raw_mode()?;
    io::stdout().execute( EnterAlternateScreen )?;
    let mut terminal = Terminal::new( CrosstermBackend::new( io::stdout() ) )?;

    let result = run( &mut terminal, config ).await;

    // Cleanup
    disable_raw_mode()?;
    io::stdout().execute( LeaveAlternateScreen )?;

    if let Some( fatal ) = result? {
        tracing::error!( "{}", fatal );
        eprintln!( "songbird: {}", fatal );
        std::process::exit( fatal.exit_code() );
    }

    Ok(())
}


/// Draws the main UI.
fn draw_ui( frame: &mut Frame, app: &mut App ) {
    let area = frame.area();

    let chunks = Layout::default()
        .direction( Direction::Vertical )
        .constraints([
            Constraint::Length( 4 ),  // Now playing
            Constraint::Min( 0 ),     // Albums
            Constraint::Length( 1 ),  // Status bar
        ])
        .split( area );

    draw_now_playing( frame, app, chunks[0] );
    draw_albums( frame, app, chunks[1] );
    draw_status_bar( frame, app, chunks[2] );

    if app.ui.view_mode == ViewMode::Help {
        draw_help( frame, centered( area, 60, 20 ) );
    }
}


fn draw_now_playing( frame: &mut Frame, app: &App, area: Rect ) {
    let mut lines = app.ui.now_playing.lines();
    let mut text = Vec::new();

    if let Some( title ) = lines.next() {
        text.push( Line::from( Span::styled( format!( " {} ", title ), Style::default().bold() ) ) );
    }
    for line in lines {
        text.push( Line::from( Span::styled( format!( " {} ", line ), Style::default().fg( Color::Gray ) ) ) );
    }

    let now_playing = Paragraph::new( text )
        .block( Block::default().title( " Now Playing " ).borders( Borders::ALL ) );

    frame.render_widget( now_playing, area );
}


fn draw_albums( frame: &mut Frame, app: &mut App, area: Rect ) {
    if app.ui.library_loading {
        let loading = Paragraph::new( " Loading library..." )
            .style( Style::default().fg( Color::DarkGray ) )
            .block( Block::default().title( " Albums " ).borders( Borders::ALL ) );
        frame.render_widget( loading, area );
        return;
    }

    let rows: Vec<Row> = app.ui.albums
        .iter()
        .map( |key| Row::new( vec![ Cell::from( key.artist.clone() ), Cell::from( key.album.clone() ) ] ) )
        .collect();

    let header = Row::new( vec![ "Artist", "Album" ] )
        .style( Style::default().fg( Color::Cyan ).bold() );

    let title = format!( " Albums ({}) ", app.ui.albums.len() );
    let table = Table::new( rows, [ Constraint::Percentage( 40 ), Constraint::Percentage( 60 ) ] )
        .header( header )
        .block( Block::default().title( title ).borders( Borders::ALL ) )
        .row_highlight_style( Style::default().bg( Color::DarkGray ) )
        .highlight_symbol( ">> " );

    frame.render_stateful_widget( table, area, &mut app.ui.album_state );
}


fn draw_help( frame: &mut Frame, area: Rect ) {
    let help = Paragraph::new( input::help_text() )
        .block( Block::default().title( " Help " ).borders( Borders::ALL ) )
        .wrap( Wrap { trim: false } );

    frame.render_widget( Clear, area );
    frame.render_widget( help, area );
}


fn draw_status_bar( frame: &mut Frame, app: &App, area: Rect ) {
    let device = match app.orchestrator.device_name() {
        Some( name ) if app.ui.device_connected => format!( "Speaker: {}", name ),
        _ => "No device".to_string(),
    };

    let media_state = app.orchestrator.media_state();
    let media = if app.ui.media_ready {
        format!( "Serving on {}:{}", media_state.host, media_state.port )
    } else {
        "Media server starting".to_string()
    };

    let hint = "[Enter]Play album [z/x/c/v/b]Prev/Play/Pause/Stop/Next [+/-]Vol [F1]Help [^Q]Quit";
    let status = Paragraph::new( format!( " {} | {} | {} ", device, media, hint ) )
        .style( Style::default().fg( Color::DarkGray ) );

    frame.render_widget( status, area );
}


/// A rectangle of at most `width` x `height` centered in `area`.
fn centered( area: Rect, width: u16, height: u16 ) -> Rect {
    let width = width.min( area.width );
    let height = height.min( area.height );
    Rect {
        x: area.x + ( area.width - width ) / 2,
        y: area.y + ( area.height - height ) / 2,
        width,
        height,
    }
}
