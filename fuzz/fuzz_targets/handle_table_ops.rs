#![no_main]

use hdebug_core::{DebugError, Handle, HandleTable};
use libfuzzer_sys::fuzz_target;

#[derive(Clone, Copy, PartialEq, Eq)]
enum State {
    Alive,
    Closed,
}

fuzz_target!(|data: &[u8]| {
    let Some((&first, ops)) = data.split_first() else {
        return;
    };
    let ops = if ops.len() > 16 * 1024 {
        &ops[..16 * 1024]
    } else {
        ops
    };

    let mut table = HandleTable::new(usize::from(first >> 4), usize::from(first & 0x0f));
    // (debug handle, universal handle, state) for everything issued so far.
    let mut issued: Vec<(Handle, Handle, State)> = Vec::new();
    let mut next_underlying = 1usize;

    for pair in ops.chunks(2) {
        let pick = pair.get(1).copied().unwrap_or(0) as usize;
        match pair[0] % 4 {
            0 => {
                let u = Handle(next_underlying);
                next_underlying += 1;
                let d = table.open(u).expect("open");
                assert!(!d.is_null());
                for (h, _, st) in &issued {
                    if *st == State::Alive {
                        assert_ne!(*h, d, "live handle issued twice");
                    }
                }
                issued.push((d, u, State::Alive));
            }
            1 if !issued.is_empty() => {
                let (d, u, st) = issued[pick % issued.len()];
                match (st, table.unwrap(d)) {
                    (State::Alive, Ok(got)) => assert_eq!(got, u),
                    (State::Alive, Err(e)) => panic!("unwrap of live handle failed: {e}"),
                    (State::Closed, Ok(_)) => panic!("unwrap of closed handle succeeded"),
                    (State::Closed, Err(e)) => assert!(
                        matches!(e, DebugError::UseAfterClose { .. }) || e.is_invalid_handle()
                    ),
                }
            }
            2 if !issued.is_empty() => {
                let i = pick % issued.len();
                let (d, u, st) = issued[i];
                match (st, table.close(d)) {
                    (State::Alive, Ok(got)) => {
                        assert_eq!(got, u);
                        issued[i].2 = State::Closed;
                    }
                    (State::Alive, Err(e)) => panic!("close of live handle failed: {e}"),
                    (State::Closed, Ok(_)) => panic!("second close succeeded"),
                    (State::Closed, Err(e)) => {
                        assert!(e.is_double_close() || e.is_invalid_handle())
                    }
                }
            }
            3 => {
                table.new_generation();
            }
            _ => {}
        }
        let alive = issued.iter().filter(|(_, _, st)| *st == State::Alive).count();
        assert_eq!(table.open_count(), alive);
    }
});
