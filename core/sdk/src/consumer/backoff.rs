/* Licensed to the Apache Software Foundation (ASF) under one
 * or more contributor license agreements.  See the NOTICE file
 * distributed with this work for additional information
 * regarding copyright ownership.  The ASF licenses this file
 * to you under the Apache License, Version 2.0 (the
 * "License"); you may not use this file except in compliance
 * with the License.  You may obtain a copy of the License at
 *
 *   http://www.apache.org/licenses/LICENSE-2.0
 *
 * Unless required by applicable law or agreed to in writing,
 * software distributed under the License is distributed on an
 * "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
 * KIND, either express or implied.  See the License for the
 * specific language governing permissions and limitations
 * under the License.
 */

use rand::Rng;
use std::time::Duration;

const INITIAL_DELAY: Duration = Duration::from_millis(100);
const MAX_DELAY: Duration = Duration::from_secs(60);

/// Exponential reconnection backoff with jitter.
///
/// The base delay doubles on every call up to the cap; each returned value
/// is the current base scaled by a random factor in `[0.5, 1.0)` so a herd
/// of consumers does not retry in lockstep.
#[derive(Debug)]
pub(crate) struct Backoff {
    next_delay: Duration,
}

impl Backoff {
    pub fn new() -> Self {
        Self {
            next_delay: INITIAL_DELAY,
        }
    }

    pub fn next(&mut self) -> Duration {
        let jitter = rand::rng().random_range(0.5..1.0);
        let delay = self.next_delay.mul_f64(jitter);
        self.next_delay = (self.next_delay * 2).min(MAX_DELAY);
        delay
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delays_stay_within_the_jittered_envelope() {
        let mut backoff = Backoff::new();
        let mut base = INITIAL_DELAY;
        for _ in 0..12 {
            let delay = backoff.next();
            assert!(delay >= base.mul_f64(0.5), "{delay:?} below envelope");
            assert!(delay < base, "{delay:?} above envelope");
            base = (base * 2).min(MAX_DELAY);
        }
    }

    #[test]
    fn base_delay_caps_at_the_maximum() {
        let mut backoff = Backoff::new();
        for _ in 0..32 {
            backoff.next();
        }
        assert!(backoff.next() < MAX_DELAY);
        assert!(backoff.next_delay == MAX_DELAY);
    }
}
