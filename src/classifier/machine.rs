//! Core hotkey classifier
//!
//! Turns the raw flags-changed / key-down stream into `Trigger`s for the
//! configured hotkey. Combo hotkeys are a stateless exact match. Bare
//! modifier hotkeys run an optimistic-confirm protocol: a press is only
//! reported once the modifier has been held alone for `CONFIRM_DELAY`, and
//! any other key or modifier during the hold marks it as "used as a
//! modifier", which suppresses the press for that whole hold.

use std::time::{Duration, Instant};

use tracing::{debug, trace};

use super::timer::ConfirmTimer;
use crate::events::{InputEvent, Trigger};
use crate::hotkey::{BareKey, Hotkey, KeyCombo, ModifierFlags};

/// How long a bare modifier must be held alone before `Pressed` fires
pub const CONFIRM_DELAY: Duration = Duration::from_millis(60);

/// Per-hold state for a bare modifier hotkey
#[derive(Debug, Default)]
struct HoldState {
    /// The tracked modifier is physically down
    modifier_down: bool,
    /// Another key or modifier was used during this hold
    used_as_modifier: bool,
    /// `Pressed` was already emitted for this hold
    pressed_fired: bool,
    /// Flags from the previous flags-changed event
    last_flags: ModifierFlags,
    /// Deferred "confirm press"
    pending: ConfirmTimer,
}

/// Classifies keyboard events against a single hotkey
#[derive(Debug)]
pub struct HotkeyClassifier {
    hotkey: Hotkey,
    hold: HoldState,
}

impl HotkeyClassifier {
    pub fn new(hotkey: Hotkey) -> Self {
        Self {
            hotkey,
            hold: HoldState::default(),
        }
    }

    pub fn hotkey(&self) -> &Hotkey {
        &self.hotkey
    }

    /// Whether the tracked bare modifier is currently held
    pub fn is_modifier_down(&self) -> bool {
        self.hold.modifier_down
    }

    /// Swap the hotkey. All in-progress hold state is dropped.
    pub fn update_hotkey(&mut self, hotkey: Hotkey) {
        debug!(from = %self.hotkey, to = %hotkey, "classifier hotkey updated");
        self.hotkey = hotkey;
        self.reset();
    }

    /// Clear hold state and cancel any pending confirm
    pub fn reset(&mut self) {
        self.hold.pending.cancel();
        self.hold = HoldState::default();
    }

    /// Treat the current hold as used with another key, if one is in progress
    pub fn suppress_hold(&mut self) {
        if self.hold.modifier_down {
            self.mark_used_as_modifier("key consumed elsewhere during hold");
        }
    }

    /// When the pending confirm is due, if one is armed
    pub fn next_deadline(&self) -> Option<Instant> {
        self.hold.pending.deadline()
    }

    /// Run the pending confirm if its deadline has passed
    pub fn fire_due(&mut self, now: Instant, emit: &mut dyn FnMut(Trigger)) {
        if !self.hold.pending.take_due(now) {
            return;
        }

        if self.hold.modifier_down && !self.hold.used_as_modifier {
            self.hold.pressed_fired = true;
            Self::emit(Trigger::Pressed, emit);
        }
    }

    /// Feed one event observed at `now`
    pub fn handle(&mut self, event: &InputEvent, now: Instant, emit: &mut dyn FnMut(Trigger)) {
        trace!(?event, "classifying event");

        match self.hotkey {
            Hotkey::Combo(ref combo) => Self::handle_combo(combo, event, emit),
            Hotkey::Bare(target) => {
                // A confirm that came due before this event happened first
                self.fire_due(now, emit);
                self.handle_bare(target, event, now, emit);
            }
        }
    }

    fn handle_combo(combo: &KeyCombo, event: &InputEvent, emit: &mut dyn FnMut(Trigger)) {
        if let InputEvent::KeyDown {
            key_code,
            flags,
            is_repeat: false,
            ..
        } = event
        {
            if combo.matches(*key_code, flags) {
                Self::emit(Trigger::Toggle, emit);
            }
        }
    }

    fn handle_bare(
        &mut self,
        target: BareKey,
        event: &InputEvent,
        now: Instant,
        emit: &mut dyn FnMut(Trigger),
    ) {
        match event {
            InputEvent::FlagsChanged { flags, .. } => {
                self.handle_flags_changed(target, *flags, now, emit);
            }
            InputEvent::KeyDown { key_code, .. } => {
                if self.hold.modifier_down && !target.key_codes().contains(key_code) {
                    self.mark_used_as_modifier("key pressed during hold");
                }
            }
        }
    }

    fn handle_flags_changed(
        &mut self,
        target: BareKey,
        flags: ModifierFlags,
        now: Instant,
        emit: &mut dyn FnMut(Trigger),
    ) {
        let previous = std::mem::replace(&mut self.hold.last_flags, flags);
        let target_down = flags.is_set(target);

        if target_down && !self.hold.modifier_down {
            debug!(?target, "bare modifier down");
            self.hold.modifier_down = true;
            self.hold.used_as_modifier = false;
            self.hold.pressed_fired = false;
            self.hold.pending.schedule(now, CONFIRM_DELAY);
        }

        // Checked on every flags change, even when the target flag did not move
        if self.hold.modifier_down && flags.other_became_active(&previous, target) {
            self.mark_used_as_modifier("another modifier pressed during hold");
        }

        if !target_down && self.hold.modifier_down {
            self.release(target, emit);
        }
    }

    fn release(&mut self, target: BareKey, emit: &mut dyn FnMut(Trigger)) {
        self.hold.modifier_down = false;
        self.hold.pending.cancel();

        debug!(
            ?target,
            used_as_modifier = self.hold.used_as_modifier,
            pressed_fired = self.hold.pressed_fired,
            "bare modifier up"
        );

        if self.hold.pressed_fired {
            Self::emit(Trigger::Released, emit);
        } else if !self.hold.used_as_modifier {
            // Tap shorter than the confirm delay
            Self::emit(Trigger::Pressed, emit);
            Self::emit(Trigger::Released, emit);
        }

        self.hold.pressed_fired = false;
    }

    fn mark_used_as_modifier(&mut self, reason: &'static str) {
        if !self.hold.used_as_modifier {
            debug!(reason, "bare modifier used as modifier");
        }
        self.hold.used_as_modifier = true;
        self.hold.pending.cancel();
    }

    fn emit(trigger: Trigger, emit: &mut dyn FnMut(Trigger)) {
        debug!(%trigger, "emitting trigger");
        emit(trigger);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{codes, ModifierKey};

    const KEY_C: u16 = 0x08;

    struct Harness {
        classifier: HotkeyClassifier,
        start: Instant,
        out: Vec<Trigger>,
    }

    impl Harness {
        fn new(hotkey: Hotkey) -> Self {
            Self {
                classifier: HotkeyClassifier::new(hotkey),
                start: Instant::now(),
                out: Vec::new(),
            }
        }

        fn at(&self, ms: u64) -> Instant {
            self.start + Duration::from_millis(ms)
        }

        fn send(&mut self, ms: u64, event: InputEvent) {
            let now = self.at(ms);
            let out = &mut self.out;
            self.classifier.handle(&event, now, &mut |t| out.push(t));
        }

        fn tick(&mut self, ms: u64) {
            let now = self.at(ms);
            let out = &mut self.out;
            self.classifier.fire_due(now, &mut |t| out.push(t));
        }

        fn flags(&mut self, ms: u64, keys: &[BareKey]) {
            let flags = keys
                .iter()
                .fold(ModifierFlags::default(), |flags, key| flags.with(*key));
            self.send(ms, InputEvent::flags(flags));
        }

        fn take(&mut self) -> Vec<Trigger> {
            std::mem::take(&mut self.out)
        }
    }

    fn cmd_shift_r() -> Hotkey {
        Hotkey::Combo(KeyCombo {
            key_code: 0x0F,
            modifiers: [ModifierKey::Command, ModifierKey::Shift].into_iter().collect(),
            label: "R".to_owned(),
        })
    }

    fn cmd_shift() -> ModifierFlags {
        ModifierFlags::default()
            .with(BareKey::Command)
            .with(BareKey::Shift)
    }

    #[test]
    fn test_combo_toggles_on_exact_match() {
        let mut h = Harness::new(cmd_shift_r());
        h.send(0, InputEvent::key_down(0x0F, cmd_shift()));
        assert_eq!(h.take(), vec![Trigger::Toggle]);
    }

    #[test]
    fn test_combo_ignores_repeat_and_other_modifiers() {
        let mut h = Harness::new(cmd_shift_r());

        h.send(
            0,
            InputEvent::KeyDown {
                key_code: 0x0F,
                flags: cmd_shift(),
                is_repeat: true,
            },
        );
        // Superset
        h.send(10, InputEvent::key_down(0x0F, cmd_shift().with(BareKey::Option)));
        // Subset
        h.send(
            20,
            InputEvent::key_down(0x0F, ModifierFlags::default().with(BareKey::Command)),
        );
        // Wrong key
        h.send(30, InputEvent::key_down(0x0E, cmd_shift()));

        assert!(h.take().is_empty());
    }

    #[test]
    fn test_combo_ignores_flag_changes_and_never_schedules() {
        let mut h = Harness::new(cmd_shift_r());
        h.send(0, InputEvent::flags(cmd_shift()));
        h.send(10, InputEvent::flags(ModifierFlags::default()));

        assert!(h.take().is_empty());
        assert!(h.classifier.next_deadline().is_none());
    }

    #[test]
    fn test_short_bare_tap_emits_press_and_release() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        assert!(h.take().is_empty());

        h.flags(30, &[]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
        assert!(h.classifier.next_deadline().is_none());
    }

    #[test]
    fn test_held_bare_modifier_presses_after_delay() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        assert_eq!(h.classifier.next_deadline(), Some(h.at(60)));

        h.tick(59);
        assert!(h.take().is_empty());

        h.tick(60);
        assert_eq!(h.take(), vec![Trigger::Pressed]);

        h.flags(1500, &[]);
        assert_eq!(h.take(), vec![Trigger::Released]);
    }

    #[test]
    fn test_due_confirm_fires_before_late_event() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);

        // The key arrives after the confirm was due but before it was ticked
        h.send(100, InputEvent::key_down(KEY_C, ModifierFlags::default().with(BareKey::Function)));
        assert_eq!(h.take(), vec![Trigger::Pressed]);

        h.flags(200, &[]);
        assert_eq!(h.take(), vec![Trigger::Released]);
    }

    #[test]
    fn test_key_during_hold_suppresses_press() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.send(20, InputEvent::key_down(KEY_C, ModifierFlags::default().with(BareKey::Function)));
        assert!(h.classifier.next_deadline().is_none());

        h.tick(100);
        h.flags(300, &[]);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_target_own_key_code_does_not_count() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.send(
            10,
            InputEvent::key_down(codes::FUNCTION, ModifierFlags::default().with(BareKey::Function)),
        );
        h.flags(20, &[]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_other_modifier_during_hold_suppresses_press() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.flags(15, &[BareKey::Function, BareKey::Shift]);
        assert!(h.classifier.next_deadline().is_none());

        h.flags(40, &[BareKey::Function]);
        h.tick(100);
        h.flags(120, &[]);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_used_as_modifier_sticks_for_the_hold() {
        let mut h = Harness::new(Hotkey::Bare(BareKey::Option));
        h.flags(0, &[BareKey::Option]);
        h.send(10, InputEvent::key_down(KEY_C, ModifierFlags::default().with(BareKey::Option)));
        h.tick(500);
        h.flags(600, &[]);
        assert!(h.take().is_empty());

        // Next hold starts clean
        h.flags(700, &[BareKey::Option]);
        h.flags(720, &[]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_modifier_already_held_does_not_count_as_use() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Shift]);
        h.flags(10, &[BareKey::Shift, BareKey::Function]);
        h.flags(30, &[BareKey::Shift]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_release_follows_fired_press_even_if_used_later() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.tick(60);
        assert_eq!(h.take(), vec![Trigger::Pressed]);

        h.send(200, InputEvent::key_down(KEY_C, ModifierFlags::default().with(BareKey::Function)));
        h.flags(300, &[]);
        assert_eq!(h.take(), vec![Trigger::Released]);
    }

    #[test]
    fn test_repeated_down_report_is_ignored() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.flags(40, &[BareKey::Function]);
        // Deadline was not pushed out by the duplicate
        assert_eq!(h.classifier.next_deadline(), Some(h.at(60)));

        h.tick(60);
        h.flags(80, &[]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_release_without_press_is_ignored() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[]);
        h.send(5, InputEvent::key_down(KEY_C, ModifierFlags::default()));
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_each_bare_key_tracks_its_own_flag() {
        for target in [BareKey::Command, BareKey::Option, BareKey::Shift, BareKey::Control] {
            let mut h = Harness::new(Hotkey::Bare(target));

            // The function key is just another modifier here
            h.flags(0, &[BareKey::Function]);
            h.flags(10, &[]);
            assert!(h.take().is_empty(), "{target:?}");

            h.flags(20, &[target]);
            h.flags(40, &[]);
            assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released], "{target:?}");
        }
    }

    #[test]
    fn test_update_hotkey_mid_hold_cancels_pending() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        assert!(h.classifier.is_modifier_down());

        h.classifier.update_hotkey(Hotkey::Bare(BareKey::Function));
        assert!(!h.classifier.is_modifier_down());
        assert!(h.classifier.next_deadline().is_none());

        h.tick(100);
        h.flags(120, &[]);
        assert!(h.take().is_empty());
    }

    #[test]
    fn test_suppressed_hold_stays_silent() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.classifier.suppress_hold();
        assert!(h.classifier.next_deadline().is_none());

        h.tick(100);
        h.flags(120, &[]);
        assert!(h.take().is_empty());

        // Without a hold in progress it leaves the next one alone
        h.classifier.suppress_hold();
        h.flags(200, &[BareKey::Function]);
        h.flags(210, &[]);
        assert_eq!(h.take(), vec![Trigger::Pressed, Trigger::Released]);
    }

    #[test]
    fn test_update_hotkey_to_combo() {
        let mut h = Harness::new(Hotkey::default());
        h.flags(0, &[BareKey::Function]);
        h.classifier.update_hotkey(cmd_shift_r());

        h.tick(100);
        h.flags(120, &[]);
        assert!(h.take().is_empty());

        h.send(200, InputEvent::key_down(0x0F, cmd_shift()));
        assert_eq!(h.take(), vec![Trigger::Toggle]);
    }

    #[test]
    fn test_bare_mode_never_toggles() {
        let mut h = Harness::new(Hotkey::default());
        for i in 0..5 {
            let base = i * 100;
            h.flags(base, &[BareKey::Function]);
            h.tick(base + 70);
            h.flags(base + 80, &[]);
        }
        let out = h.take();
        assert_eq!(out.len(), 10);
        assert!(!out.contains(&Trigger::Toggle));
    }
}
