//! Key bindings for the TUI.
//!
//! Maps key presses to user actions. The letter row `z x c v b` follows the
//! classic player transport layout.

use crossterm::event::{ KeyCode, KeyModifiers };

use songbird_core::PlaybackCommand;


/// Something the user asked for.
#[derive( Debug, Clone, Copy, PartialEq, Eq )]
pub enum Action {
    CursorUp,
    CursorDown,
    /// Play the highlighted album.
    Select,
    Previous,
    Play,
    Pause,
    Stop,
    Next,
    VolumeUp,
    VolumeDown,
    Help,
    Quit,
}


impl Action {
    /// Resolves a key press to an action.
    pub fn from_key( code: KeyCode, modifiers: KeyModifiers ) -> Option<Self> {
        if modifiers.contains( KeyModifiers::CONTROL ) {
            return match code {
                KeyCode::Char( 'q' ) | KeyCode::Char( 'c' ) => Some( Action::Quit ),
                _ => None,
            };
        }

        match code {
            KeyCode::Up | KeyCode::Char( 'k' ) => Some( Action::CursorUp ),
            KeyCode::Down | KeyCode::Char( 'j' ) => Some( Action::CursorDown ),
            KeyCode::Enter => Some( Action::Select ),
            KeyCode::Char( 'z' ) => Some( Action::Previous ),
            KeyCode::Char( 'x' ) => Some( Action::Play ),
            KeyCode::Char( 'c' ) => Some( Action::Pause ),
            KeyCode::Char( 'v' ) => Some( Action::Stop ),
            KeyCode::Char( 'b' ) => Some( Action::Next ),
            KeyCode::Char( '+' ) | KeyCode::Char( '=' ) => Some( Action::VolumeUp ),
            KeyCode::Char( '-' ) => Some( Action::VolumeDown ),
            KeyCode::F( 1 ) => Some( Action::Help ),
            _ => None,
        }
    }


    /// The transport command behind this action, if it is one.
    pub fn transport( self ) -> Option<PlaybackCommand> {
        match self {
            Action::Previous => Some( PlaybackCommand::Previous ),
            Action::Play => Some( PlaybackCommand::Play ),
            Action::Pause => Some( PlaybackCommand::Pause ),
            Action::Stop => Some( PlaybackCommand::Stop ),
            Action::Next => Some( PlaybackCommand::Next ),
            _ => None,
        }
    }
}


/// Key hints for the help overlay.
pub fn help_text() -> &'static str {
    r#"Navigation:
  k / Up          Move up
  j / Down        Move down
  Enter           Play selected album

Transport:
  z               Previous (restarts track after a few seconds)
  x               Play
  c               Pause
  v               Stop
  b               Next
  + / -           Volume up / down

Other:
  F1              Show this help
  Ctrl+Q          Quit

Press any key to close."#
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_transport_row() {
        let none = KeyModifiers::NONE;
        assert_eq!( Action::from_key( KeyCode::Char( 'z' ), none ), Some( Action::Previous ) );
        assert_eq!( Action::from_key( KeyCode::Char( 'x' ), none ), Some( Action::Play ) );
        assert_eq!( Action::from_key( KeyCode::Char( 'c' ), none ), Some( Action::Pause ) );
        assert_eq!( Action::from_key( KeyCode::Char( 'v' ), none ), Some( Action::Stop ) );
        assert_eq!( Action::from_key( KeyCode::Char( 'b' ), none ), Some( Action::Next ) );
    }


    #[test]
    fn test_navigation() {
        let none = KeyModifiers::NONE;
        assert_eq!( Action::from_key( KeyCode::Char( 'k' ), none ), Some( Action::CursorUp ) );
        assert_eq!( Action::from_key( KeyCode::Down, none ), Some( Action::CursorDown ) );
        assert_eq!( Action::from_key( KeyCode::Enter, none ), Some( Action::Select ) );
        assert_eq!( Action::from_key( KeyCode::F( 1 ), none ), Some( Action::Help ) );
    }


    #[test]
    fn test_ctrl_q_quits_but_q_does_not() {
        assert_eq!( Action::from_key( KeyCode::Char( 'q' ), KeyModifiers::CONTROL ), Some( Action::Quit ) );
        assert_eq!( Action::from_key( KeyCode::Char( 'q' ), KeyModifiers::NONE ), None );
    }


    #[test]
    fn test_ctrl_c_is_not_pause() {
        assert_eq!( Action::from_key( KeyCode::Char( 'c' ), KeyModifiers::CONTROL ), Some( Action::Quit ) );
    }


    #[test]
    fn test_transport_commands() {
        assert_eq!( Action::Pause.transport(), Some( PlaybackCommand::Pause ) );
        assert_eq!( Action::VolumeUp.transport(), None );
        assert_eq!( Action::Select.transport(), None );
    }
}
