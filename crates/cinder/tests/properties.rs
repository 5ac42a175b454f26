//! Property tests for the thread state machine and frame decoding.

use proptest::prelude::*;

use cinder::{apply, ControlEnvelope, ControlEvent, ErrorKind, Frame, ThreadStatus};
use cinder_testkit::generators::{control_event, origin, public_key, thread, thread_id};

proptest! {
    #[test]
    fn apply_is_total(t in thread(), e in control_event(), o in origin()) {
        match apply(&t, &e, o) {
            Ok(next) => {
                prop_assert_eq!(&next.thread_id, &t.thread_id);
                prop_assert!(next.metadata_revision >= t.metadata_revision);
                prop_assert!(next.metadata_revision <= t.metadata_revision + 1);
            }
            Err(err) => prop_assert!(matches!(
                err.kind(),
                ErrorKind::InvalidTransition | ErrorKind::Validation
            )),
        }
    }

    #[test]
    fn apply_is_idempotent(t in thread(), e in control_event(), o in origin()) {
        if let Ok(once) = apply(&t, &e, o) {
            let twice = apply(&once, &e, o).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn burned_is_final(t in thread(), e in control_event(), o in origin()) {
        let mut burned = t.clone();
        burned.mark_burned(t.updated_at);
        if let Ok(next) = apply(&burned, &e, o) {
            prop_assert_eq!(next.status, ThreadStatus::Burned);
            prop_assert!(next.control_token.is_none());
            prop_assert!(!next.holds_key_material());
        }
    }

    #[test]
    fn terminal_only_moves_to_burned(t in thread(), e in control_event(), o in origin()) {
        if t.is_terminal() {
            if let Ok(next) = apply(&t, &e, o) {
                prop_assert!(next.status == t.status || next.status == ThreadStatus::Burned);
            }
        }
    }

    #[test]
    fn outbound_events_carry_no_keys(e in control_event()) {
        match e.outbound() {
            ControlEvent::MintCt { wrapped_key, .. } | ControlEvent::MintDt { wrapped_key, .. } => {
                prop_assert!(wrapped_key.is_none());
            }
            other => prop_assert_eq!(other, e),
        }
    }

    #[test]
    fn control_frames_decode(id in thread_id(), from in public_key(), e in control_event()) {
        let frame = Frame::Control(ControlEnvelope { thread_id: id, from, event: e });
        let decoded = Frame::decode(&frame.to_bytes().unwrap()).unwrap();
        prop_assert_eq!(decoded, frame);
    }
}
