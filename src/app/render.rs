use crate::conversation::Turn;

const USER_LABEL: &str = "You";
const MODEL_LABEL: &str = "Insight AI";

pub(super) fn render_turn(turn: &Turn) -> String {
    let speaker = if turn.is_user { USER_LABEL } else { MODEL_LABEL };
    if turn.timestamp.is_empty() {
        format!("{speaker}:\n{}\n", turn.text)
    } else {
        format!("{speaker} ({}):\n{}\n", turn.timestamp, turn.text)
    }
}
