use crate::{
    catalog::{Action, IrCommand},
    config::{parse_channel, PendingEdits, SurfConfig},
    parser::ParsedRequest,
    scheduler::{tune_sequence, SurfAction},
    types::SurfMode,
};

/// What the transport loop must do with the scheduler after a dispatch.
/// Every outcome except `NoMatch` requires stopping any in-flight
/// scheduler task first; only a `ModeChanged` with a jumping mode starts
/// a replacement.
#[derive(Debug, Clone, PartialEq)]
pub enum RouterOutcome {
    ModeChanged(SurfConfig),
    ImmediateCommand(Vec<SurfAction>),
    ParamUpdated,
    NoMatch,
}

/// Fixed-priority prefix table, first match wins.
pub fn dispatch(request: &ParsedRequest, edits: &mut PendingEdits) -> RouterOutcome {
    let path = request.path.as_str();

    if path.starts_with("/mode/off") {
        // Carry the pending values so turning off does not discard them.
        return RouterOutcome::ModeChanged(edits.build_config(SurfMode::Off));
    }

    if path.starts_with("/mode/power") {
        return RouterOutcome::ImmediateCommand(vec![SurfAction::Transmit(IrCommand::Action(
            Action::Power,
        ))]);
    }

    if path.starts_with("/mode/jump-delay") {
        return RouterOutcome::ModeChanged(edits.build_config(SurfMode::JumpOnDelay));
    }

    if path.starts_with("/mode/jump-random") {
        return RouterOutcome::ModeChanged(edits.build_config(SurfMode::JumpRandom));
    }

    if path.starts_with("/favorite-number") {
        edits.set_channel(request.param("favoriteNumberInput"));
        return RouterOutcome::ParamUpdated;
    }

    if path.starts_with("/delay-number") {
        edits.set_delay(request.param("delayNumberInput"));
        return RouterOutcome::ParamUpdated;
    }

    if path.starts_with("/set-channel") {
        if let Some(channel) = request.param("setChannelInput").and_then(parse_channel) {
            return RouterOutcome::ImmediateCommand(tune_sequence(channel));
        }
        return RouterOutcome::ParamUpdated;
    }

    RouterOutcome::NoMatch
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::parser::parse;

    fn request(line: &str) -> ParsedRequest {
        parse(&format!("GET {line} HTTP/1.1\r\nHost: x\r\n\r\n")).unwrap()
    }

    fn transmissions(actions: &[SurfAction]) -> Vec<IrCommand> {
        actions
            .iter()
            .filter_map(|action| match action {
                SurfAction::Transmit(command) => Some(*command),
                SurfAction::Delay(_) => None,
            })
            .collect()
    }

    #[test]
    fn mode_off_carries_pending_values() {
        let mut edits = PendingEdits::default();
        edits.set_channel(Some("7"));
        edits.set_delay(Some("15"));

        let outcome = dispatch(&request("/mode/off"), &mut edits);

        match outcome {
            RouterOutcome::ModeChanged(config) => {
                assert_eq!(config.mode, SurfMode::Off);
                assert_eq!(config.target_channel, 7);
                assert_eq!(config.fixed_delay_ms, 15_000);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn mode_off_is_idempotent() {
        let mut edits = PendingEdits::default();

        let first = dispatch(&request("/mode/off"), &mut edits);
        let second = dispatch(&request("/mode/off"), &mut edits);

        assert_eq!(first, second);
        assert_eq!(edits, PendingEdits::default());
    }

    #[test]
    fn power_is_an_immediate_single_press() {
        let mut edits = PendingEdits::default();

        let outcome = dispatch(&request("/mode/power"), &mut edits);

        assert_eq!(
            outcome,
            RouterOutcome::ImmediateCommand(vec![SurfAction::Transmit(IrCommand::Action(
                Action::Power
            ))]),
        );
    }

    #[test]
    fn jump_delay_builds_config_from_pending_edits() {
        let mut edits = PendingEdits::default();
        edits.set_channel(Some("42"));
        edits.set_delay(Some("90"));

        let outcome = dispatch(&request("/mode/jump-delay"), &mut edits);

        match outcome {
            RouterOutcome::ModeChanged(config) => {
                assert_eq!(config.mode, SurfMode::JumpOnDelay);
                assert_eq!(config.target_channel, 42);
                assert_eq!(config.fixed_delay_ms, 90_000);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn jump_random_uses_current_channel() {
        let mut edits = PendingEdits::default();
        dispatch(
            &request("/favorite-number?favoriteNumberInput=7"),
            &mut edits,
        );

        let outcome = dispatch(&request("/mode/jump-random"), &mut edits);

        match outcome {
            RouterOutcome::ModeChanged(config) => {
                assert_eq!(config.mode, SurfMode::JumpRandom);
                assert_eq!(config.target_channel, 7);
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn favorite_update_changes_only_pending_channel() {
        let mut edits = PendingEdits::default();

        let outcome = dispatch(
            &request("/favorite-number?favoriteNumberInput=7"),
            &mut edits,
        );

        assert_eq!(outcome, RouterOutcome::ParamUpdated);
        assert_eq!(edits.channel, "7");
        assert_eq!(edits.delay, "60");
    }

    #[test]
    fn unparseable_or_missing_params_keep_previous_values() {
        let mut edits = PendingEdits::default();

        assert_eq!(
            dispatch(
                &request("/favorite-number?favoriteNumberInput=abc"),
                &mut edits,
            ),
            RouterOutcome::ParamUpdated,
        );
        assert_eq!(
            dispatch(&request("/favorite-number"), &mut edits),
            RouterOutcome::ParamUpdated,
        );
        assert_eq!(
            dispatch(&request("/delay-number?delayNumberInput="), &mut edits),
            RouterOutcome::ParamUpdated,
        );

        assert_eq!(edits, PendingEdits::default());
    }

    #[test]
    fn set_channel_tunes_immediately() {
        let mut edits = PendingEdits::default();

        let outcome = dispatch(&request("/set-channel?setChannelInput=35"), &mut edits);

        match outcome {
            RouterOutcome::ImmediateCommand(actions) => {
                assert_eq!(
                    transmissions(&actions),
                    vec![
                        IrCommand::Action(Action::DirectTune),
                        IrCommand::Digit(3),
                        IrCommand::Digit(5),
                    ],
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        // The tuned channel is not a favorite update.
        assert_eq!(edits.channel, "2");
    }

    #[test]
    fn set_channel_rejects_out_of_range() {
        let mut edits = PendingEdits::default();

        let outcome = dispatch(&request("/set-channel?setChannelInput=150"), &mut edits);

        assert_eq!(outcome, RouterOutcome::ParamUpdated);
    }

    #[test]
    fn unknown_route_changes_nothing() {
        let mut edits = PendingEdits::default();

        assert_eq!(dispatch(&request("/"), &mut edits), RouterOutcome::NoMatch);
        assert_eq!(
            dispatch(&request("/favicon.ico"), &mut edits),
            RouterOutcome::NoMatch,
        );
        assert_eq!(edits, PendingEdits::default());
    }
}
