//! End-to-end scan flows against the canned device.

mod common;

use common::{CannedPipe, film_status_block};
use filmscan_core::adapter::{OPT_FRAME_NEGATIVE, OPT_PRODUCT, OptionValue, ScannerBackend};
use filmscan_core::types::ScannerError;
use filmscan_core::{ScanState, Session};

/// The fixed exit sequence as control-out transfers: frame 0, carriage
/// home, LED off, release.
fn assert_release_tail(pipe: &CannedPipe) {
    let outs = pipe.outs();
    let tail: Vec<(u8, Vec<u8>)> = outs
        .iter()
        .rev()
        .take(4)
        .rev()
        .map(|(value, payload)| ((*value >> 8) as u8, payload.clone()))
        .collect();
    assert_eq!(
        tail,
        vec![
            (0xE7, vec![0x00, 0x00]),
            (0x2B, vec![0, 0, 0, 0, 0, 0]),
            (0xE6, vec![0, 0, 0, 0, 0]),
            (0x17, vec![0x00]),
        ],
        "release path out of order"
    );
}

fn reserve_release_counts(pipe: &CannedPipe) -> (usize, usize) {
    (pipe.outs_for(0x16).len(), pipe.outs_for(0x17).len())
}

#[test]
fn open_writes_blocks_back() {
    let session = Session::open(CannedPipe::new()).unwrap();
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.product(), "IX-40015G");
    assert_eq!(session.film_status().holder_type(), 1);

    let pipe = session.scanner_pipe();
    // one scan-mode and one window write-back during the handshake
    assert_eq!(pipe.outs_for(0xD6).len(), 1);
    assert_eq!(pipe.outs_for(0x24).len(), 1);
    // the open drain
    assert_eq!(pipe.outs_for(0xC0).len(), 1);
    // the write-back zeroes the vendor tail but keeps the first two bytes
    let put = &pipe.outs_for(0xD6)[0];
    assert_eq!(put[4], 0x20);
    assert_eq!(put[5], 0x20);
    assert!(put[6..15].iter().all(|b| *b == 0));
}

#[test]
fn negative_holder_frame_three_motion() {
    let mut session = Session::open(CannedPipe::new()).unwrap();
    session.scan_frame(3, false).unwrap();
    assert_eq!(session.state(), ScanState::Drained);
    assert!(session.scan_buffer().is_some());

    // Holder moves: focus position 2038 - 236 = 1802, then 2038.
    let moves = session.scanner_pipe().outs_for(0x2B);
    let holder_moves: Vec<&Vec<u8>> = moves.iter().filter(|payload| payload[1] == 1).collect();
    assert_eq!(holder_moves[0], &vec![0, 1, 0, 4, 0x07, 0x0A]); // 1802
    assert_eq!(holder_moves[1], &vec![0, 1, 0, 4, 0x07, 0xF6]); // 2038

    assert_release_tail(session.scanner_pipe());
    assert_eq!(reserve_release_counts(session.scanner_pipe()), (1, 1));
}

#[test]
fn slide_frame_out_of_range() {
    let mut pipe = CannedPipe::new();
    pipe.film = film_status_block(2, 4);
    let mut session = Session::open(pipe).unwrap();

    match session.scan_frame(4, false) {
        Err(ScannerError::Protocol(_)) => {}
        other => panic!("expected protocol error, got {other:?}"),
    }
    assert_eq!(session.state(), ScanState::Cancelled);

    let pipe = session.scanner_pipe();
    // no scan opcode was ever issued
    assert!(pipe.outs_for(0x2A).is_empty());
    assert_release_tail(pipe);
    assert_eq!(reserve_release_counts(pipe), (1, 1));
}

#[test]
fn missing_holder_aborts_with_lamp_off() {
    let mut pipe = CannedPipe::new();
    pipe.film = film_status_block(0, 0);
    let mut session = Session::open(pipe).unwrap();

    match session.scan_frame(0, false) {
        Err(ScannerError::NoFilmHolder) => {}
        other => panic!("expected no-film-holder, got {other:?}"),
    }

    let pipe = session.scanner_pipe();
    // lamp powered off before bailing out
    assert_eq!(pipe.outs_for(0xE8).last().unwrap(), &vec![0x00]);
    assert!(pipe.outs_for(0x2A).is_empty());
    assert_release_tail(pipe);
}

#[test]
fn sense_during_scan_runs_release_path() {
    let mut pipe = CannedPipe::new();
    pipe.sense_on = Some(0x2A);
    let mut session = Session::open(pipe).unwrap();

    match session.scan_frame(0, false) {
        Err(ScannerError::Sense { key, .. }) => assert_eq!(key, 0x06),
        other => panic!("expected sense error, got {other:?}"),
    }
    assert_eq!(session.state(), ScanState::Cancelled);
    assert!(session.scan_buffer().is_none());
    assert_release_tail(session.scanner_pipe());
    assert_eq!(reserve_release_counts(session.scanner_pipe()), (1, 1));

    // acknowledging the failure returns the session to idle
    session.cancel();
    assert_eq!(session.state(), ScanState::Idle);
}

#[test]
fn abort_mid_setup_cancels_and_releases() {
    let mut session = Session::open(CannedPipe::new()).unwrap();
    let abort = session.abort_flag();
    session.set_feedback(Box::new(move |message| {
        if message == "Focussing" {
            abort.raise();
        }
    }));

    match session.scan_frame(1, false) {
        Err(ScannerError::Cancelled) => {}
        other => panic!("expected cancellation, got {other:?}"),
    }
    assert_eq!(session.state(), ScanState::Cancelled);
    // the device-side cancel went out on top of the one from open
    assert_eq!(session.scanner_pipe().outs_for(0xC0).len(), 2);
    assert_release_tail(session.scanner_pipe());
    assert_eq!(reserve_release_counts(session.scanner_pipe()), (1, 1));
}

#[test]
fn repeated_cancel_from_idle_is_noop() {
    let mut session = Session::open(CannedPipe::new()).unwrap();
    let quiesced = session.scanner_pipe().log_len();
    session.cancel();
    session.cancel();
    assert_eq!(session.state(), ScanState::Idle);
    assert_eq!(session.scanner_pipe().log_len(), quiesced);
}

#[test]
fn auto_exposure_switches_to_left_to_right() {
    let mut session = Session::open(CannedPipe::new()).unwrap();
    session.scan_frame(0, true).unwrap();

    // two acquisitions: pre-pass and main pass
    let pipe = session.scanner_pipe();
    assert_eq!(pipe.outs_for(0x2A).len(), 2);
    // the main pass flips to the left-to-right frame code
    let frames = pipe.outs_for(0xE7);
    assert!(frames.contains(&vec![0x00, 0x01]));
    // exposure never exceeds the shutter cap
    let max_shutter = session.params().max_shutter;
    assert!(session.params().shutter.iter().all(|s| *s <= max_shutter));
    assert_release_tail(pipe);
}

#[test]
fn no_margin_flag_follows_margin() {
    // margin 0 sets the no-margin bit in every scan-mode write
    let mut session = Session::open(CannedPipe::new()).unwrap();
    let mut params = session.params().clone();
    params.margin = 0;
    session.set_params(params).unwrap();
    session.scan_frame(0, false).unwrap();
    let puts = session.scanner_pipe().outs_for(0xD6);
    assert!(puts.len() > 1);
    for put in &puts[1..] {
        // sample-mod mode 0 for 14-bit input, plus the no-margin flag
        assert_eq!(put[20], 0x20);
    }

    // the default margin leaves the flag clear
    let mut session = Session::open(CannedPipe::new()).unwrap();
    session.scan_frame(0, false).unwrap();
    let puts = session.scanner_pipe().outs_for(0xD6);
    for put in &puts[1..] {
        assert_eq!(put[20], 0x00);
    }
}

#[test]
fn adapter_scan_and_drain() {
    let session = Session::open(CannedPipe::new()).unwrap();
    let mut backend = ScannerBackend::from_session(session);

    match backend.get_option(OPT_PRODUCT).unwrap() {
        OptionValue::Text(product) => assert_eq!(product, "IX-40015G"),
        other => panic!("expected text option, got {other:?}"),
    }

    backend
        .set_option(OPT_FRAME_NEGATIVE, OptionValue::Int(4))
        .unwrap();
    backend.start().unwrap();

    let params = backend.get_parameters();
    // canned geometry: 20 lines of 120 bytes at 16-bit depth, minus the
    // sixteen lines lost to the 4000 lpi deinterlace
    assert_eq!(params.lines, 4);
    assert_eq!(params.bytes_per_line, 120);
    assert_eq!(params.pixels_per_line, 20);
    assert_eq!(params.depth, 16);

    let mut drained = 0usize;
    let mut chunk = [0u8; 100];
    loop {
        let n = backend.read(&mut chunk).unwrap();
        if n == 0 {
            break;
        }
        drained += n;
    }
    assert_eq!(drained, 4 * 120);
    assert_eq!(backend.session().state(), ScanState::Idle);

    // the selected frame drove the holder offset for frame index 3
    let moves = backend.session().scanner_pipe().outs_for(0x2B);
    assert!(moves.contains(&vec![0, 1, 0, 4, 0x07, 0xF6]));
}

#[test]
fn adapter_rejects_bad_options() {
    let session = Session::open(CannedPipe::new()).unwrap();
    let mut backend = ScannerBackend::from_session(session);

    assert!(backend.set_option(OPT_PRODUCT, OptionValue::Int(1)).is_err());
    assert!(
        backend
            .set_option(OPT_FRAME_NEGATIVE, OptionValue::Int(7))
            .is_err()
    );
    assert!(backend.set_blocking(false).is_err());
    assert!(backend.set_blocking(true).is_ok());
}

#[test]
fn frame_options_are_mutually_exclusive() {
    use filmscan_core::adapter::OPT_FRAME_SLIDE;

    let session = Session::open(CannedPipe::new()).unwrap();
    let mut backend = ScannerBackend::from_session(session);

    backend
        .set_option(OPT_FRAME_NEGATIVE, OptionValue::Int(5))
        .unwrap();
    backend
        .set_option(OPT_FRAME_SLIDE, OptionValue::Int(2))
        .unwrap();
    assert_eq!(
        backend.get_option(OPT_FRAME_NEGATIVE).unwrap(),
        OptionValue::Int(0)
    );
    assert_eq!(
        backend.get_option(OPT_FRAME_SLIDE).unwrap(),
        OptionValue::Int(2)
    );
}
