//! Concurrency test: claims racing a new session for the same course.
//!
//! Starting a session closes the course's active one with Absent backfill.
//! Every enrolled student must end up with exactly one record in the
//! superseded session. A claim that is slow inside the biometric step
//! must not hold up sessions of other courses.

use std::sync::{mpsc, Arc, Barrier, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use attendance_integrity::biometric::{BiometricComparator, ComparisonOutcome};
use attendance_integrity::directory::InMemoryDirectory;
use attendance_integrity::notify::MemoryNotifier;
use attendance_integrity::{
    AccountId, AttendanceEngine, AttendanceError, AttendanceStatus, Caller, Claim, Collaborators,
    Coordinates, CourseId, DeviceId, EngineConfig, Result, Role, SessionSummary,
};

const T0: u64 = 1_700_000_000_000;
const STUDENTS: usize = 48;

fn run_race(round: u64) {
    let course = CourseId::from("EE-310");
    let mut dir = InMemoryDirectory::new();
    dir.add_course("EE-310", "Signals")
        .add_account("teacher", "Teacher", Role::Teacher);
    for i in 0..STUDENTS {
        let id = format!("s{i}");
        dir.add_account(id.as_str(), id.as_str(), Role::Student);
        dir.enroll(&course, &AccountId::from(id)).unwrap();
    }
    let engine = Arc::new(
        AttendanceEngine::new(
            EngineConfig::default(),
            Collaborators::from_directory(Arc::new(dir))
                .with_notifier(Arc::new(MemoryNotifier::new())),
        )
        .unwrap(),
    );

    let teacher = Caller::new("teacher", Role::Teacher);
    let start = T0 + round * 10_000_000;
    let first = engine
        .start_session_at(&teacher, &course, Some(Coordinates::new(0.0, 0.0)), None, start)
        .unwrap();
    let token = engine
        .current_token_at(&teacher, &first.id, start)
        .unwrap()
        .token;

    let barrier = Arc::new(Barrier::new(STUDENTS + 1));
    let mut handles = Vec::new();
    for i in 0..STUDENTS {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let claim = Claim {
            session_id: first.id.clone(),
            claimant: AccountId::from(format!("s{i}")),
            device: DeviceId::from(format!("d{i}")),
            token: token.clone(),
            location: Coordinates::new(0.0, 0.0),
            proof_image: None,
        };
        handles.push(thread::spawn(move || {
            barrier.wait();
            let caller = Caller::new(claim.claimant.clone(), Role::Student);
            match engine.submit_claim_at(&caller, &claim, start + 1_000) {
                Ok(_) => {}
                Err(AttendanceError::SessionInactive(_)) => {}
                Err(e) => panic!("unexpected rejection for {}: {e}", claim.claimant),
            }
        }));
    }

    let restarter = {
        let engine = Arc::clone(&engine);
        let barrier = Arc::clone(&barrier);
        let course = course.clone();
        thread::spawn(move || {
            barrier.wait();
            engine
                .start_session_at(
                    &Caller::new("teacher", Role::Teacher),
                    &course,
                    Some(Coordinates::new(0.0, 0.0)),
                    None,
                    start + 1_500,
                )
                .expect("replacement session starts")
        })
    };

    for h in handles {
        h.join().unwrap();
    }
    let second = restarter.join().unwrap();

    let records = engine.ledger().records_for_session(&first.id);
    assert_eq!(records.len(), STUDENTS, "one record per enrolled student");
    let present = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Present)
        .count();
    let absent = records
        .iter()
        .filter(|r| r.status == AttendanceStatus::Absent)
        .count();
    assert_eq!(present + absent, STUDENTS);

    let active = engine.active_session(&teacher, &course).unwrap().unwrap();
    assert_eq!(active.id, second.id);
    assert!(engine.ledger().records_for_session(&second.id).is_empty());
}

#[test]
fn stress_claims_racing_session_supersede() {
    for round in 0..20 {
        run_race(round);
    }
}

/// Signals when a comparison begins, then takes its time.
struct SlowComparator {
    entered: Mutex<mpsc::Sender<()>>,
    delay: Duration,
}

impl BiometricComparator for SlowComparator {
    fn compare(&self, _reference: &str, _live: &[u8]) -> Result<ComparisonOutcome> {
        if let Ok(tx) = self.entered.lock() {
            let _ = tx.send(());
        }
        thread::sleep(self.delay);
        Ok(ComparisonOutcome::Distance(0.1))
    }
}

fn claim_for(engine: &AttendanceEngine, session: &SessionSummary, student: &str) -> Claim {
    let token = engine
        .current_token_at(&Caller::new("teacher", Role::Teacher), &session.id, T0)
        .unwrap()
        .token;
    Claim {
        session_id: session.id.clone(),
        claimant: AccountId::from(student),
        device: DeviceId::from(format!("{student}-phone")),
        token,
        location: Coordinates::new(0.0, 0.0),
        proof_image: None,
    }
}

#[test]
fn supersede_behind_slow_claim_leaves_other_courses_responsive() {
    let course_a = CourseId::from("EE-310");
    let course_b = CourseId::from("EE-320");
    let mut dir = InMemoryDirectory::new();
    dir.add_course("EE-310", "Signals")
        .add_course("EE-320", "Control Systems")
        .add_account("teacher", "Teacher", Role::Teacher)
        .add_account("alice", "Alice", Role::Student)
        .add_account("bruno", "Bruno", Role::Student);
    dir.enroll(&course_a, &AccountId::from("alice")).unwrap();
    dir.enroll(&course_b, &AccountId::from("bruno")).unwrap();
    dir.set_reference_image(&AccountId::from("alice"), "https://img.example/alice.jpg");

    let (tx, rx) = mpsc::channel();
    let engine = Arc::new(
        AttendanceEngine::new(
            EngineConfig::default(),
            Collaborators::from_directory(Arc::new(dir))
                .with_notifier(Arc::new(MemoryNotifier::new()))
                .with_comparator(Arc::new(SlowComparator {
                    entered: Mutex::new(tx),
                    delay: Duration::from_millis(1_500),
                })),
        )
        .unwrap(),
    );

    let teacher = Caller::new("teacher", Role::Teacher);
    let anchor = Some(Coordinates::new(0.0, 0.0));
    let session_a = engine
        .start_session_at(&teacher, &course_a, anchor, None, T0)
        .unwrap();
    let session_b = engine
        .start_session_at(&teacher, &course_b, anchor, None, T0)
        .unwrap();

    let mut slow_claim = claim_for(&engine, &session_a, "alice");
    slow_claim.proof_image = Some(b"live".to_vec());
    let claimer = {
        let engine = Arc::clone(&engine);
        thread::spawn(move || {
            engine.submit_claim_at(&Caller::new("alice", Role::Student), &slow_claim, T0 + 1_000)
        })
    };
    rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // Blocks on alice's claim until the comparator returns.
    let restarter = {
        let engine = Arc::clone(&engine);
        let course_a = course_a.clone();
        thread::spawn(move || {
            engine.start_session_at(
                &Caller::new("teacher", Role::Teacher),
                &course_a,
                Some(Coordinates::new(0.0, 0.0)),
                None,
                T0 + 1_500,
            )
        })
    };
    thread::sleep(Duration::from_millis(50));

    let started = Instant::now();
    let fast_claim = claim_for(&engine, &session_b, "bruno");
    let record = engine
        .submit_claim_at(&Caller::new("bruno", Role::Student), &fast_claim, T0 + 2_000)
        .unwrap();
    let elapsed = started.elapsed();
    assert!(record.is_present());
    assert!(
        elapsed < Duration::from_millis(500),
        "claim on another course took {elapsed:?}"
    );

    let slow_record = claimer.join().unwrap().unwrap();
    assert!(slow_record.is_present());
    let replacement = restarter.join().unwrap().unwrap();
    let active = engine.active_session(&teacher, &course_a).unwrap().unwrap();
    assert_eq!(active.id, replacement.id);
    assert_ne!(active.id, session_a.id);
}
