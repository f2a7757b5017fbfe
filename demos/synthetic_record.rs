//! Synthetic recording example.
//!
//! Records two seconds from the mock microphone and a synthetic texture
//! producer into an interleaved container file, then prints its summary.
//!
//! Run with: cargo run --example synthetic_record

use std::time::{Duration, Instant};

use stream_recorder::compositor::IDENTITY;
use stream_recorder::container::read_summary;
use stream_recorder::source::{audio_input_factory, AudioInput, MockAudioInput};
use stream_recorder::{clock, Profile, Recorder, RecorderEvent};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let path = std::env::temp_dir().join("synthetic_record.srv");
    println!("Recording to {} for 2 seconds...", path.display());

    let mut recorder = Recorder::builder()
        .audio_input(audio_input_factory(|| {
            Box::new(MockAudioInput::sine(440.0)) as Box<dyn AudioInput>
        }))
        .on_event(|event| {
            if let RecorderEvent::Encoder { track, event } = event {
                println!("[{track}] {event:?}");
            }
        })
        .build();

    recorder.set_profile(
        Profile::builder()
            .video_size(480, 480)
            .video_frame_rate(30)
            .build()?,
    )?;
    recorder.set_output_file(&path)?;
    // 4:3 camera into a square video
    recorder.set_preview_size(640, 480);

    recorder.prepare()?;
    recorder.start()?;

    let deadline = Instant::now() + Duration::from_secs(2);
    let mut texture = 0;
    while Instant::now() < deadline {
        recorder.update_frame(texture % 3, IDENTITY, clock::monotonic_nanos());
        texture += 1;
        std::thread::sleep(Duration::from_millis(33));
    }

    let stats = recorder.stop()?;
    recorder.release();
    println!("Stats: {stats:?}");

    let summary = read_summary(&path)?;
    println!(
        "Recording saved: {} tracks, {:?}, finalized: {}",
        summary.tracks.len(),
        summary.duration(),
        summary.finalized
    );

    Ok(())
}
