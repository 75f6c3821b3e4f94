use std::io::stdout;
use std::{process, time::Duration};

use crossterm::{
    cursor::{Hide, MoveToColumn, Show},
    event::{poll, read, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode},
    Result,
};

fn poll_key(accept: fn(&Event) -> bool) -> Result<bool> {
    enable_raw_mode()?;

    let mut matched = false;

    execute!(stdout(), Hide)?;
    let result = poll(Duration::from_millis(500))?;
    execute!(stdout(), MoveToColumn(0), Show)?;
    disable_raw_mode()?;

    if result {
        // It's guaranteed that read() wont block if `poll` returns `Ok(true)`
        let event = read()?;

        if event
            == Event::Key(KeyEvent {
                modifiers: KeyModifiers::CONTROL,
                code: KeyCode::Char('c'),
            })
        {
            // As we are in raw mode, Ctrl+C will be captured here as a key
            // event. Catch it and exit the process if that happens
            process::exit(0);
        }

        if accept(&event) {
            matched = true;
        }
    } else {
        // Timeout expired with no event
    }

    Ok(matched)
}

/// Non-blocking poll for the `ESC` key, used to cancel waiting loops.
pub(crate) fn poll_escape() -> Result<bool> {
    poll_key(|event| *event == Event::Key(KeyCode::Esc.into()))
}

/// Non-blocking poll for a key ending the output pass-through after a
/// `dofile`: `Enter` or `ESC`.
pub(crate) fn poll_stop_key() -> Result<bool> {
    poll_key(|event| {
        *event == Event::Key(KeyCode::Esc.into()) || *event == Event::Key(KeyCode::Enter.into())
    })
}
