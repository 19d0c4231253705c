//! Document id generation
//!
//! Push ids: 8 characters of millisecond timestamp followed by 12 random
//! characters. Ids sort lexicographically by creation time, and ids created
//! within the same millisecond stay ordered by incrementing the random part.

use std::sync::Mutex;

use chrono::Utc;
use rand::Rng;

const PUSH_CHARS: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";

struct PushState {
    last_ms: i64,
    last_random: [u8; 12],
}

static PUSH_STATE: Mutex<PushState> = Mutex::new(PushState {
    last_ms: 0,
    last_random: [0; 12],
});

/// Generates a 20 character time-ordered id
pub fn push_id() -> String {
    let now = Utc::now().timestamp_millis();
    let mut state = PUSH_STATE.lock().unwrap_or_else(|p| p.into_inner());

    if now == state.last_ms {
        // carry through the random suffix
        for slot in state.last_random.iter_mut().rev() {
            if *slot < 63 {
                *slot += 1;
                break;
            }
            *slot = 0;
        }
    } else {
        let mut rng = rand::thread_rng();
        for slot in state.last_random.iter_mut() {
            *slot = rng.gen_range(0..64);
        }
        state.last_ms = now;
    }

    let mut id = String::with_capacity(20);
    let mut ts = now.max(0);
    let mut time_chars = [0u8; 8];
    for slot in time_chars.iter_mut().rev() {
        *slot = PUSH_CHARS[(ts % 64) as usize];
        ts /= 64;
    }
    id.extend(time_chars.iter().map(|c| *c as char));
    id.extend(
        state
            .last_random
            .iter()
            .map(|i| PUSH_CHARS[*i as usize] as char),
    );
    id
}
