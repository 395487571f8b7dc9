//! Whole-session scenarios
//!
//! Runs a client and a server session against each other on the simulated
//! timeline and checks what each side observes.

use rtsp_protocol::{
    ClientConfig, CongestionConfig, ConstantProvider, Method, SeqNumber, ServerConfig,
    SessionError, SessionEvent, SessionState, SourceCatalog,
};
use rtsp_tests::{Side, Simulation};
use std::time::Duration;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn client_for(file: &str) -> ClientConfig {
    ClientConfig {
        file_name: file.to_string(),
        ..ClientConfig::default()
    }
}

fn server_at(level: u32) -> ServerConfig {
    ServerConfig {
        congestion: CongestionConfig::default().starting_at(level),
        ..ServerConfig::default()
    }
}

fn seqs(frames: &[(SeqNumber, usize)]) -> Vec<u32> {
    frames.iter().map(|(seq, _)| seq.as_raw()).collect()
}

fn assert_consecutive(values: &[u32]) {
    for pair in values.windows(2) {
        assert_eq!(pair[1], pair[0] + 1, "gap or repeat in {:?}", values);
    }
}

#[test]
fn test_five_frames_at_level_two() {
    let catalog = SourceCatalog::new().with("clip.dat", vec![1000; 5]);
    let mut sim = Simulation::new(client_for("clip.dat"), server_at(2), catalog);
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play);
    sim.start();

    // Five frames paced from 105 ms, the last one played at 302 ms
    sim.run_until(ms(310));

    let sent = sim.sent_frames();
    assert_eq!(sent.len(), 5);
    assert!(sent.iter().all(|&(_, size, level)| size == 500 && level == 2));

    let received = sim.received_frames();
    assert_eq!(seqs(&received), vec![0, 1, 2, 3, 4]);
    assert!(received.iter().all(|&(_, size)| size == 500));

    let played = sim.played_frames();
    assert_eq!(seqs(&played), vec![0, 1, 2, 3, 4]);
    assert!(played.iter().all(|&(_, size)| size == 500));

    assert_eq!(sim.client().loss().cumulative_lost, 0);
    assert_eq!(sim.client().stats().frames_skipped, 0);
    assert_eq!(sim.server().next_seq(), SeqNumber::new(5));
    // Source exhausted: the pacer stopped re-arming itself
    assert!(!sim.server().is_pacing());
    assert!(sim.errors().is_empty());
}

#[test]
fn test_setup_then_teardown_never_paces() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(50), Method::Teardown);
    sim.start();
    sim.run_until(ms(1000));

    assert!(sim.sent_frames().is_empty());
    assert!(!sim.server().is_pacing());
    assert_eq!(
        sim.state_history(Side::Server),
        vec![SessionState::Ready, SessionState::Init]
    );
    assert_eq!(sim.client().state(), SessionState::Init);
    assert!(!sim.client().is_feedback_running());
    assert_eq!(sim.armed_timers(Side::Client), 0);
    assert_eq!(sim.armed_timers(Side::Server), 0);
    assert_eq!(sim.pending_events(), 0);
}

#[test]
fn test_full_sequence_ends_in_init() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play)
        .schedule(ms(1000), Method::Pause)
        .schedule(ms(1500), Method::Play)
        .schedule(ms(2500), Method::Teardown);
    sim.start();
    sim.run_until(ms(3000));

    let expected = vec![
        SessionState::Ready,
        SessionState::Playing,
        SessionState::Ready,
        SessionState::Playing,
        SessionState::Init,
    ];
    assert_eq!(sim.state_history(Side::Client), expected);
    assert_eq!(sim.state_history(Side::Server), expected);

    assert_eq!(sim.client().state(), SessionState::Init);
    assert_eq!(sim.server().state(), SessionState::Init);
    assert_eq!(sim.client().pending_requests(), 0);
    assert!(!sim.client().is_playout_running());
    assert!(!sim.client().is_feedback_running());
    assert!(!sim.server().is_pacing());
    assert_eq!(sim.armed_timers(Side::Client), 0);
    assert_eq!(sim.armed_timers(Side::Server), 0);
    assert!(sim.run_until_idle(10));

    // Nothing is paced while the server is paused
    let paused = sim.server_events().iter().any(|(at, event)| {
        matches!(event, SessionEvent::FrameSent { .. }) && *at > ms(1005) && *at < ms(1505)
    });
    assert!(!paused);

    // Sequence numbers continue across the pause
    let sent: Vec<u32> = sim
        .sent_frames()
        .iter()
        .map(|(seq, _, _)| seq.as_raw())
        .collect();
    assert_eq!(sent[0], 0);
    assert_consecutive(&sent);
    assert_consecutive(&seqs(&sim.played_frames()));
}

#[test]
fn test_loss_raises_level() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        server_at(1),
        ConstantProvider { frame_size: 1600 },
    )
    .drop_data_where(|seq| seq.as_raw() % 2 == 0);
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play);
    sim.start();

    // First report leaves the client at 410 ms
    sim.run_until(ms(500));

    assert!(!sim.dropped().is_empty());
    assert_eq!(sim.level_changes(), vec![(1, 2)]);
    assert_eq!(sim.server().level(), 2);
    assert_eq!(sim.server().congestion().threshold_floor(), Some(2));
    assert!(sim.client().fraction_lost() > 0.2);
    assert!(sim.client().stats().frames_skipped > 0);

    // Frames sent after the change are halved
    let last = sim.sent_frames().last().copied();
    assert!(matches!(last, Some((_, 800, 2))));
}

#[test]
fn test_no_loss_restores_full_quality() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 16_000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play);
    sim.start();
    sim.run_until(ms(4000));

    assert_eq!(sim.level_changes(), vec![(16, 8), (8, 4), (4, 2), (2, 1)]);
    assert_eq!(sim.server().level(), 1);
    assert_eq!(sim.server().congestion().threshold_floor(), None);
    assert_eq!(sim.client().loss().cumulative_lost, 0);

    let sent = sim.sent_frames();
    assert_eq!(sent.first().map(|&(_, size, _)| size), Some(1000));
    assert_eq!(sent.last().map(|&(_, size, _)| size), Some(16_000));
}

#[test]
fn test_loss_burst_leaves_floor() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        server_at(4),
        ConstantProvider { frame_size: 16_000 },
    )
    .drop_data_where(|seq| seq.as_raw() < 30);
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play);
    sim.start();
    sim.run_until(ms(8000));

    let changes = sim.level_changes();
    assert_eq!(changes.first(), Some(&(4, 8)));
    assert_eq!(changes.last(), Some(&(16, 8)));
    // The floor recorded at the first loss keeps the level from halving
    // back to where the loss started
    assert_eq!(sim.server().congestion().threshold_floor(), Some(8));
    assert_eq!(sim.server().level(), 8);
    assert!(changes.iter().all(|&(_, to)| to >= 8));
}

#[test]
fn test_modify_lowers_level() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(200), Method::Modify);
    sim.start();
    sim.run_until(ms(300));

    assert_eq!(sim.level_changes(), vec![(16, 8)]);
    assert_eq!(sim.server().state(), SessionState::Ready);
    assert_eq!(sim.client().state(), SessionState::Ready);
}

#[test]
fn test_describe_names_source() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(50), Method::Describe);
    sim.start();
    sim.run_until(ms(100));

    assert_eq!(sim.server().source_name(), Some("clip.dat"));
    let answered = sim.client_events().iter().any(|(_, event)| {
        *event
            == SessionEvent::ResponseReceived {
                method: Method::Describe,
                status: 200,
            }
    });
    assert!(answered);
    assert!(sim.errors().is_empty());
}

#[test]
fn test_play_before_setup_is_rejected() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Play);
    sim.start();
    sim.run_until(ms(100));

    assert_eq!(sim.client().state(), SessionState::Init);
    assert_eq!(sim.server().state(), SessionState::Init);
    assert!(!sim.server().is_pacing());
    assert!(!sim.client().is_playout_running());
    assert!(matches!(
        sim.errors(),
        [(
            Side::Client,
            SessionError::Status {
                method: Method::Play,
                status: 455
            }
        )]
    ));
}

#[test]
fn test_malformed_request_is_ignored() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup);
    sim.start();
    sim.run_until(ms(50));

    sim.inject_server_control(b"RECORD\nclip.dat");
    sim.inject_server_control(b"SETUP");
    sim.run_until(ms(100));

    assert_eq!(sim.errors().len(), 2);
    assert!(sim.errors().iter().all(|(side, _)| *side == Side::Server));
    assert_eq!(sim.server().state(), SessionState::Ready);
    assert_eq!(sim.server().stats().malformed_requests, 2);

    // Only the scheduled SETUP was answered
    let responses = sim
        .client_events()
        .iter()
        .filter(|(_, event)| matches!(event, SessionEvent::ResponseReceived { .. }))
        .count();
    assert_eq!(responses, 1);
}

#[test]
fn test_missing_source_streams_nothing() {
    let mut sim = Simulation::new(
        client_for("missing.dat"),
        ServerConfig::default(),
        SourceCatalog::new(),
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play);
    sim.start();
    sim.run_until(ms(1000));

    assert_eq!(sim.server().state(), SessionState::Playing);
    assert!(sim.sent_frames().is_empty());
    assert!(!sim.server().is_pacing());
    assert_eq!(sim.client().frame_period(), Some(ms(32)));
}

#[test]
fn test_feedback_ignored_outside_playing() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        server_at(4),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup);
    sim.start();
    sim.run_until(ms(50));

    sim.inject_feedback(&rtsp_protocol::FeedbackReport::new(1.0).to_bytes());
    sim.run_until(ms(1000));

    assert_eq!(sim.server().level(), 4);
    assert!(sim.level_changes().is_empty());
    // The injected report plus the client's own zero reports at 410 and 810 ms
    assert_eq!(sim.server().stats().feedback_reports, 3);
}

#[test]
fn test_resetup_keeps_sequence_continuity() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play)
        .schedule(ms(500), Method::Teardown);
    sim.start();

    // Sending TEARDOWN drops whatever is still scheduled
    sim.run_until(ms(550));
    assert_eq!(sim.client().state(), SessionState::Init);
    sim.send_request(Method::Setup, None).unwrap();
    sim.run_until(ms(650));
    sim.send_request(Method::Play, None).unwrap();
    sim.run_until(ms(1000));

    assert_eq!(sim.client().state(), SessionState::Playing);
    assert_eq!(sim.server().state(), SessionState::Playing);

    let played = seqs(&sim.played_frames());
    assert_eq!(played[0], 0);
    assert_consecutive(&played);
    assert_eq!(sim.client().loss().cumulative_lost, 0);
    assert_eq!(sim.client().stats().late_frames, 0);
    assert!(sim.errors().is_empty());
}

#[test]
fn test_stop_cancels_everything() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.schedule(ms(0), Method::Setup)
        .schedule(ms(100), Method::Play)
        .schedule(ms(5000), Method::Teardown);
    sim.start();
    sim.run_until(ms(600));
    assert!(sim.server().is_pacing());
    assert!(sim.client().is_playout_running());

    sim.stop();

    assert_eq!(sim.armed_timers(Side::Client), 0);
    assert_eq!(sim.armed_timers(Side::Server), 0);
    assert_eq!(sim.client().pending_requests(), 0);
    assert_eq!(sim.client().state(), SessionState::Init);
    assert_eq!(sim.server().state(), SessionState::Init);

    // Only frames already on the wire remain
    assert!(sim.run_until_idle(100));
    assert!(sim.now() < ms(700));
}

#[test]
fn test_manual_requests_follow_schedule() {
    let mut sim = Simulation::new(
        client_for("clip.dat"),
        ServerConfig::default(),
        ConstantProvider { frame_size: 1000 },
    );
    sim.start();
    sim.send_request(Method::Setup, Some("other.dat".to_string()))
        .unwrap();
    sim.run_until(ms(20));

    assert_eq!(sim.server().source_name(), Some("other.dat"));
    assert_eq!(sim.client().state(), SessionState::Ready);
    assert!(sim.client().is_feedback_running());
}
