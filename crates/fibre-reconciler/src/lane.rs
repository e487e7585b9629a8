#![forbid(unsafe_code)]

//! Lanes: 31-bit priority sets.
//!
//! Every pending update carries exactly one lane. A render works on a set
//! of lanes at once, and per-root bookkeeping ([`RootLanes`]) decides which
//! set to render next, which lanes are starving, and which are entangled.
//!
//! Lower bit positions are more urgent. The lowest set bit of a set is its
//! highest-priority lane.
//!
//! # Layout
//!
//! | Bits    | Lanes                                     |
//! |---------|-------------------------------------------|
//! | 0       | `SYNC`                                    |
//! | 1..=2   | input-continuous (hydration, normal)      |
//! | 3..=4   | default (hydration, normal)               |
//! | 5       | transition hydration                      |
//! | 6..=21  | 16 transition lanes                       |
//! | 22..=26 | 5 retry lanes                             |
//! | 27      | selective hydration                       |
//! | 28..=29 | idle (hydration, normal)                  |
//! | 30      | `OFFSCREEN`                               |

use std::fmt;

use bitflags::bitflags;
use fibre_scheduler::PriorityLevel;

/// Number of lanes.
pub const TOTAL_LANES: usize = 31;

/// Marker for "no timestamp recorded".
pub const NO_TIMESTAMP: f64 = -1.0;

bitflags! {
    /// A set of lanes. A single-bit set is a [`Lane`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, PartialOrd, Ord)]
    pub struct Lanes: u32 {
        const SYNC = 1 << 0;
        const INPUT_CONTINUOUS_HYDRATION = 1 << 1;
        const INPUT_CONTINUOUS = 1 << 2;
        const DEFAULT_HYDRATION = 1 << 3;
        const DEFAULT = 1 << 4;
        const TRANSITION_HYDRATION = 1 << 5;
        const TRANSITION_1 = 1 << 6;
        const TRANSITION_2 = 1 << 7;
        const TRANSITION_3 = 1 << 8;
        const TRANSITION_4 = 1 << 9;
        const TRANSITION_5 = 1 << 10;
        const TRANSITION_6 = 1 << 11;
        const TRANSITION_7 = 1 << 12;
        const TRANSITION_8 = 1 << 13;
        const TRANSITION_9 = 1 << 14;
        const TRANSITION_10 = 1 << 15;
        const TRANSITION_11 = 1 << 16;
        const TRANSITION_12 = 1 << 17;
        const TRANSITION_13 = 1 << 18;
        const TRANSITION_14 = 1 << 19;
        const TRANSITION_15 = 1 << 20;
        const TRANSITION_16 = 1 << 21;
        const RETRY_1 = 1 << 22;
        const RETRY_2 = 1 << 23;
        const RETRY_3 = 1 << 24;
        const RETRY_4 = 1 << 25;
        const RETRY_5 = 1 << 26;
        const SELECTIVE_HYDRATION = 1 << 27;
        const IDLE_HYDRATION = 1 << 28;
        const IDLE = 1 << 29;
        const OFFSCREEN = 1 << 30;

        const TRANSITIONS = 0b0000000_0011_1111_1111_1111_1100_0000;
        const RETRIES = 0b0000111_1100_0000_0000_0000_0000_0000;
        const NON_IDLE = 0b0001111_1111_1111_1111_1111_1111_1111;
        const IDLE_LANES = Self::IDLE_HYDRATION.bits() | Self::IDLE.bits() | Self::OFFSCREEN.bits();
        const SYNC_DEFAULT = Self::SYNC.bits()
            | Self::INPUT_CONTINUOUS_HYDRATION.bits()
            | Self::INPUT_CONTINUOUS.bits()
            | Self::DEFAULT_HYDRATION.bits()
            | Self::DEFAULT.bits();
    }
}

/// A single lane (one bit set), or empty for "no lane".
pub type Lane = Lanes;

/// Per-lane storage indexed by bit position.
pub type LaneMap<T> = [T; TOTAL_LANES];

impl Lanes {
    /// Lowest set bit, i.e. the most urgent lane in the set.
    #[inline]
    #[must_use]
    pub fn highest_priority_lane(self) -> Lane {
        Lanes::from_bits_retain(self.bits() & self.bits().wrapping_neg())
    }

    /// Any lane of the set; the most urgent is as good as any.
    #[inline]
    #[must_use]
    pub fn pick_arbitrary_lane(self) -> Lane {
        self.highest_priority_lane()
    }

    /// True when `self` and `other` share a lane.
    #[inline]
    pub fn includes_some(self, other: Lanes) -> bool {
        self.intersects(other)
    }

    /// True when every lane of `subset` is in `self`.
    #[inline]
    pub fn is_superset_of(self, subset: Lanes) -> bool {
        self.contains(subset)
    }

    /// True when the set is non-empty and only holds transition lanes.
    pub fn includes_only_transitions(self) -> bool {
        !self.is_empty() && Lanes::TRANSITIONS.contains(self)
    }

    /// True when the set is non-empty and only holds retry lanes.
    pub fn includes_only_retries(self) -> bool {
        !self.is_empty() && Lanes::RETRIES.contains(self)
    }

    /// True when the set includes non-idle work.
    pub fn includes_non_idle_work(self) -> bool {
        self.intersects(Lanes::NON_IDLE)
    }

    /// True when a render of these lanes must not yield.
    pub fn includes_blocking_lane(self) -> bool {
        self.contains(Lanes::SYNC)
    }

    /// Iterate single lanes, most urgent first.
    pub fn lanes(self) -> impl Iterator<Item = Lane> {
        let mut rest = self.bits();
        std::iter::from_fn(move || {
            if rest == 0 {
                return None;
            }
            let lane = rest & rest.wrapping_neg();
            rest &= !lane;
            Some(Lanes::from_bits_retain(lane))
        })
    }

    /// Bit position of a single lane.
    ///
    /// Panics in debug builds when `self` is not exactly one lane.
    #[inline]
    pub fn index(self) -> usize {
        debug_assert_eq!(self.bits().count_ones(), 1, "lane index of {self:?}");
        self.bits().trailing_zeros() as usize
    }

    /// Label for the highest-priority lane (logs and traces).
    pub fn label(self) -> &'static str {
        let lane = self.highest_priority_lane();
        if lane.is_empty() {
            "none"
        } else if lane == Lanes::SYNC {
            "sync"
        } else if lane == Lanes::INPUT_CONTINUOUS_HYDRATION {
            "input-continuous-hydration"
        } else if lane == Lanes::INPUT_CONTINUOUS {
            "input-continuous"
        } else if lane == Lanes::DEFAULT_HYDRATION {
            "default-hydration"
        } else if lane == Lanes::DEFAULT {
            "default"
        } else if lane == Lanes::TRANSITION_HYDRATION {
            "transition-hydration"
        } else if Lanes::TRANSITIONS.contains(lane) {
            "transition"
        } else if Lanes::RETRIES.contains(lane) {
            "retry"
        } else if lane == Lanes::SELECTIVE_HYDRATION {
            "selective-hydration"
        } else if lane == Lanes::IDLE_HYDRATION {
            "idle-hydration"
        } else if lane == Lanes::IDLE {
            "idle"
        } else {
            "offscreen"
        }
    }
}

impl fmt::Display for Lanes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#033b}", self.bits())
    }
}

/// Coarse priority classes used at the event boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum EventPriority {
    /// Clicks, key presses: maps to [`Lanes::SYNC`].
    Discrete,
    /// Drags, scrolls: maps to [`Lanes::INPUT_CONTINUOUS`].
    Continuous,
    /// Everything else.
    #[default]
    Default,
    /// Background work.
    Idle,
}

impl EventPriority {
    /// The lane updates dispatched at this priority get.
    pub fn lane(self) -> Lane {
        match self {
            EventPriority::Discrete => Lanes::SYNC,
            EventPriority::Continuous => Lanes::INPUT_CONTINUOUS,
            EventPriority::Default => Lanes::DEFAULT,
            EventPriority::Idle => Lanes::IDLE,
        }
    }

    /// Event priority that covers the most urgent lane of `lanes`.
    pub fn from_lanes(lanes: Lanes) -> Self {
        let lane = lanes.highest_priority_lane();
        if !is_higher_event_priority(EventPriority::Discrete.lane(), lane) {
            return EventPriority::Discrete;
        }
        if !is_higher_event_priority(EventPriority::Continuous.lane(), lane) {
            return EventPriority::Continuous;
        }
        if lane.includes_non_idle_work() {
            return EventPriority::Default;
        }
        EventPriority::Idle
    }

    /// Scheduler priority a render task for this event priority runs at.
    pub fn scheduler_priority(self) -> PriorityLevel {
        match self {
            EventPriority::Discrete => PriorityLevel::Immediate,
            EventPriority::Continuous => PriorityLevel::UserBlocking,
            EventPriority::Default => PriorityLevel::Normal,
            EventPriority::Idle => PriorityLevel::Idle,
        }
    }

    /// Map a scheduler priority back to an event priority.
    pub fn from_scheduler_priority(priority: PriorityLevel) -> Self {
        match priority {
            PriorityLevel::Immediate => EventPriority::Discrete,
            PriorityLevel::UserBlocking => EventPriority::Continuous,
            PriorityLevel::Normal | PriorityLevel::Low => EventPriority::Default,
            PriorityLevel::Idle => EventPriority::Idle,
        }
    }

    /// The less urgent of two event priorities.
    pub fn lower(self, other: EventPriority) -> Self {
        if is_higher_event_priority(self.lane(), other.lane()) {
            other
        } else {
            self
        }
    }
}

fn is_higher_event_priority(a: Lane, b: Lane) -> bool {
    !a.is_empty() && (b.is_empty() || a.bits() < b.bits())
}

/// Expiration deadline for a lane updated at `current_time`.
///
/// Retry, idle and offscreen lanes never expire.
pub fn compute_expiration_time(lane: Lane, current_time: f64) -> f64 {
    if lane == Lanes::SYNC
        || lane == Lanes::INPUT_CONTINUOUS_HYDRATION
        || lane == Lanes::INPUT_CONTINUOUS
    {
        current_time + 250.0
    } else if lane == Lanes::DEFAULT_HYDRATION
        || lane == Lanes::DEFAULT
        || lane == Lanes::TRANSITION_HYDRATION
        || Lanes::TRANSITIONS.contains(lane)
    {
        current_time + 5000.0
    } else {
        NO_TIMESTAMP
    }
}

/// Round-robin cursors for transition and retry lanes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneAllocator {
    next_transition: Lane,
    next_retry: Lane,
}

impl Default for LaneAllocator {
    fn default() -> Self {
        Self {
            next_transition: Lanes::TRANSITION_1,
            next_retry: Lanes::RETRY_1,
        }
    }
}

impl LaneAllocator {
    /// Claim the next transition lane, wrapping after the 16th.
    pub fn claim_next_transition_lane(&mut self) -> Lane {
        let lane = self.next_transition;
        let next = Lanes::from_bits_retain(lane.bits() << 1);
        self.next_transition = if Lanes::TRANSITIONS.contains(next) && !next.is_empty() {
            next
        } else {
            Lanes::TRANSITION_1
        };
        lane
    }

    /// Claim the next retry lane, wrapping after the 5th.
    pub fn claim_next_retry_lane(&mut self) -> Lane {
        let lane = self.next_retry;
        let next = Lanes::from_bits_retain(lane.bits() << 1);
        self.next_retry = if Lanes::RETRIES.contains(next) && !next.is_empty() {
            next
        } else {
            Lanes::RETRY_1
        };
        lane
    }
}

/// Which updates are forced to render together.
///
/// Entangled lanes always join each other in a render, so a transition
/// cannot observe half of a batch of related updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntanglementPolicy {
    /// Transition updates landing in the same queue entangle with the
    /// queue's other pending transition lanes. Default: true.
    pub queue_transitions: bool,
    /// Continuous input rendered together with default work pulls in all
    /// default lanes. Default: true.
    pub continuous_with_default: bool,
}

impl Default for EntanglementPolicy {
    fn default() -> Self {
        Self {
            queue_transitions: true,
            continuous_with_default: true,
        }
    }
}

/// Lane bookkeeping for one root.
#[derive(Debug, Clone)]
pub struct RootLanes {
    /// Lanes with outstanding updates somewhere under the root.
    pub pending: Lanes,
    /// Lanes whose last render suspended and have not been pinged.
    pub suspended: Lanes,
    /// Suspended lanes whose data has arrived.
    pub pinged: Lanes,
    /// Lanes past their deadline; rendered without yielding.
    pub expired: Lanes,
    /// Lanes that have entanglements recorded.
    pub entangled: Lanes,
    /// Entangled set per lane.
    pub entanglements: LaneMap<Lanes>,
    /// Most recent event time per lane.
    pub event_times: LaneMap<f64>,
    /// Expiration deadline per lane, or [`NO_TIMESTAMP`].
    pub expiration_times: LaneMap<f64>,
}

impl Default for RootLanes {
    fn default() -> Self {
        Self {
            pending: Lanes::empty(),
            suspended: Lanes::empty(),
            pinged: Lanes::empty(),
            expired: Lanes::empty(),
            entangled: Lanes::empty(),
            entanglements: [Lanes::empty(); TOTAL_LANES],
            event_times: [NO_TIMESTAMP; TOTAL_LANES],
            expiration_times: [NO_TIMESTAMP; TOTAL_LANES],
        }
    }
}

impl RootLanes {
    /// Pick the lanes the next render should work on.
    ///
    /// Expired lanes go first, one class at a time. Otherwise the most urgent non-idle,
    /// non-suspended group wins, then pinged lanes, then idle work. A render
    /// already in progress on `wip_lanes` keeps going unless the candidate
    /// is strictly more urgent. Entangled lanes are always added.
    pub fn next_lanes(&self, wip_lanes: Lanes, policy: &EntanglementPolicy) -> Lanes {
        let pending = self.pending;
        if pending.is_empty() {
            return Lanes::empty();
        }

        let mut next = Lanes::empty();
        let expired = pending & self.expired;
        if !expired.is_empty() {
            next = highest_priority_lanes(expired);
        }

        if next.is_empty() {
            let non_idle = pending & Lanes::NON_IDLE;
            if !non_idle.is_empty() {
                let unblocked = non_idle & !self.suspended;
                if !unblocked.is_empty() {
                    next = highest_priority_lanes(unblocked);
                } else {
                    let pinged = non_idle & self.pinged;
                    if !pinged.is_empty() {
                        next = highest_priority_lanes(pinged);
                    }
                }
            } else {
                let unblocked = pending & !self.suspended;
                if !unblocked.is_empty() {
                    next = highest_priority_lanes(unblocked);
                } else if !self.pinged.is_empty() {
                    next = highest_priority_lanes(self.pinged & pending);
                }
            }
        }

        if next.is_empty() {
            return Lanes::empty();
        }

        if !wip_lanes.is_empty() && wip_lanes != next && !wip_lanes.intersects(self.suspended) {
            let next_lane = next.highest_priority_lane();
            let wip_lane = wip_lanes.highest_priority_lane();
            let keep_wip = next_lane.bits() >= wip_lane.bits()
                || (next_lane == Lanes::DEFAULT && Lanes::TRANSITIONS.intersects(wip_lane));
            if keep_wip {
                return wip_lanes;
            }
        }

        if policy.continuous_with_default && next.contains(Lanes::INPUT_CONTINUOUS) {
            next |= pending & Lanes::DEFAULT;
        }

        let entangled = self.entangled & next;
        if !entangled.is_empty() {
            for lane in entangled.lanes() {
                next |= self.entanglements[lane.index()];
            }
        }
        next
    }

    /// Record an update on `lane` at `event_time`.
    ///
    /// Only the most urgent lane of a multi-lane set is recorded, and an empty
    /// set records nothing.
    ///
    /// Any non-idle update clears suspended and pinged state, since the new
    /// data may unblock a previously suspended render.
    pub fn mark_updated(&mut self, lane: Lane, event_time: f64) {
        let lane = lane.highest_priority_lane();
        if lane.is_empty() {
            return;
        }
        self.pending |= lane;
        if lane != Lanes::IDLE {
            self.suspended = Lanes::empty();
            self.pinged = Lanes::empty();
        }
        self.event_times[lane.index()] = event_time;
    }

    /// Mark lanes as suspended; they are skipped until pinged or updated.
    pub fn mark_suspended(&mut self, suspended: Lanes) {
        self.suspended |= suspended;
        self.pinged &= !suspended;
        for lane in suspended.lanes() {
            self.expiration_times[lane.index()] = NO_TIMESTAMP;
        }
    }

    /// Mark suspended lanes as pinged (their data arrived).
    pub fn mark_pinged(&mut self, pinged: Lanes) {
        self.pinged |= self.suspended & pinged;
    }

    /// Forget every lane not in `remaining` after a commit.
    pub fn mark_finished(&mut self, remaining: Lanes) {
        let no_longer_pending = self.pending & !remaining;
        self.pending = remaining;
        self.suspended = Lanes::empty();
        self.pinged = Lanes::empty();
        self.expired &= remaining;
        self.entangled &= remaining;
        for lane in no_longer_pending.lanes() {
            let index = lane.index();
            self.entanglements[index] = Lanes::empty();
            self.event_times[index] = NO_TIMESTAMP;
            self.expiration_times[index] = NO_TIMESTAMP;
        }
    }

    /// Entangle every lane of `lanes` with all the others.
    pub fn mark_entangled(&mut self, lanes: Lanes) {
        let root_entangled = self.entangled | lanes;
        self.entangled = root_entangled;
        for lane in root_entangled.lanes() {
            let index = lane.index();
            if lane.intersects(lanes) || self.entanglements[index].intersects(lanes) {
                self.entanglements[index] |= lanes;
            }
        }
    }

    /// Stamp deadlines on fresh pending lanes and move overdue lanes to
    /// `expired`.
    pub fn mark_starved_lanes_as_expired(&mut self, current_time: f64) {
        let pending = self.pending;
        for lane in pending.lanes() {
            let index = lane.index();
            let expiration = self.expiration_times[index];
            if expiration == NO_TIMESTAMP {
                if !lane.intersects(self.suspended) || lane.intersects(self.pinged) {
                    self.expiration_times[index] = compute_expiration_time(lane, current_time);
                }
            } else if expiration <= current_time {
                self.expired |= lane;
            }
        }
    }

    /// True when any lane of `lanes` has expired.
    pub fn includes_expired_lane(&self, lanes: Lanes) -> bool {
        self.expired.intersects(lanes)
    }

    /// Lanes worth one synchronous retry after a render error.
    pub fn lanes_to_retry_on_error(&self) -> Lanes {
        let everything_but_offscreen = self.pending & !Lanes::OFFSCREEN;
        if !everything_but_offscreen.is_empty() {
            return everything_but_offscreen;
        }
        if self.pending.contains(Lanes::OFFSCREEN) {
            return Lanes::OFFSCREEN;
        }
        Lanes::empty()
    }

    /// Latest event time recorded for any lane of `lanes`.
    pub fn most_recent_event_time(&self, lanes: Lanes) -> f64 {
        lanes
            .lanes()
            .map(|lane| self.event_times[lane.index()])
            .fold(NO_TIMESTAMP, f64::max)
    }
}

/// Group the most urgent lane with its class.
///
/// Transition and retry lanes batch together; every other lane stands
/// alone.
fn highest_priority_lanes(lanes: Lanes) -> Lanes {
    let lane = lanes.highest_priority_lane();
    if Lanes::TRANSITIONS.contains(lane) {
        lanes & Lanes::TRANSITIONS
    } else if Lanes::RETRIES.contains(lane) {
        lanes & Lanes::RETRIES
    } else {
        lane
    }
}
