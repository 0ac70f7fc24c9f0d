// Keyboard teleop: ZQSD move, A/E rotate, arrows set heading, R/F speed,
// Y yaw hold, C calibrate compass, B calibrate beacon, K e-stop, Space reactivate, Esc quit
use crossterm::{
    event::{self, Event, KeyCode, KeyEvent, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode},
};
use std::time::{Duration, Instant};
use tracing::info;

use skyrocket_runtime::config::TOPIC_CMD;
use skyrocket_runtime::messages::{Command, NO_TRANSLATION};

const SPEEDS: [i16; 3] = [30, 60, 100];
const INPUT_TIMEOUT_MS: u64 = 250; // Send Stop after this much time with no movement key

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let publisher = session.declare_publisher(TOPIC_CMD).await?;

    info!("Controls: ZQSD=move, A/E=rotate, arrows=heading, R/F=speed, Y=yaw hold");
    info!("          C=compass cal, B=beacon cal, K=e-stop, Space=activate, Esc=quit");

    enable_raw_mode()?;
    let result = run_teleop(&publisher).await;
    disable_raw_mode()?;

    result
}

async fn send(
    publisher: &zenoh::pubsub::Publisher<'_>,
    cmd: Command,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!("{:?}", cmd);
    publisher.put(cmd.to_bytes()).await?;
    Ok(())
}

async fn run_teleop(
    publisher: &zenoh::pubsub::Publisher<'_>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut speed_idx: usize = 0;
    let mut moving = false;
    let mut last_movement_input = Instant::now();

    send(publisher, Command::SetSpeed(SPEEDS[speed_idx])).await?;

    loop {
        if event::poll(Duration::from_millis(20))? {
            if let Event::Key(KeyEvent { code, kind, .. }) = event::read()? {
                if kind != KeyEventKind::Press && kind != KeyEventKind::Repeat {
                    continue;
                }

                let movement = match code {
                    KeyCode::Char('z') => Some((0, 0)),
                    KeyCode::Char('d') => Some((90, 0)),
                    KeyCode::Char('s') => Some((180, 0)),
                    KeyCode::Char('q') => Some((270, 0)),
                    KeyCode::Char('a') => Some((NO_TRANSLATION, -1)),
                    KeyCode::Char('e') => Some((NO_TRANSLATION, 1)),
                    _ => None,
                };
                if let Some((angle, turn)) = movement {
                    last_movement_input = Instant::now();
                    moving = true;
                    send(publisher, Command::Move { angle, turn }).await?;
                    continue;
                }

                let cmd = match code {
                    // Heading
                    KeyCode::Up => Command::SetHeading(0),
                    KeyCode::Right => Command::SetHeading(90),
                    KeyCode::Down => Command::SetHeading(180),
                    KeyCode::Left => Command::SetHeading(270),

                    // Speed control
                    KeyCode::Char('r') => {
                        speed_idx = (speed_idx + 1).min(SPEEDS.len() - 1);
                        Command::SetSpeed(SPEEDS[speed_idx])
                    }
                    KeyCode::Char('f') => {
                        speed_idx = speed_idx.saturating_sub(1);
                        Command::SetSpeed(SPEEDS[speed_idx])
                    }

                    KeyCode::Char('y') => Command::ToggleYawCompensation,
                    KeyCode::Char('c') => Command::CalibrateMagnetometer,
                    KeyCode::Char('b') => Command::CalibrateBeacon,
                    KeyCode::Char('k') => Command::EmergencyStop,
                    KeyCode::Char(' ') => Command::Activate,

                    // Quit
                    KeyCode::Esc => break,

                    _ => continue,
                };
                send(publisher, cmd).await?;
            }
        }

        // Key released (no repeats arriving): stop once
        if moving && last_movement_input.elapsed() > Duration::from_millis(INPUT_TIMEOUT_MS) {
            moving = false;
            send(publisher, Command::Stop).await?;
        }
    }

    send(publisher, Command::Stop).await
}
