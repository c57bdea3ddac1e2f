use envy::trace::TraceEventKind;

/// Query helpers over an ordered list of recorded trace events.
pub struct TraceLog {
    events: Vec<TraceEventKind>,
}

impl TraceLog {
    pub fn new(events: Vec<TraceEventKind>) -> Self {
        Self { events }
    }

    pub fn events(&self) -> &[TraceEventKind] {
        &self.events
    }

    /// Phase numbers `spec` started, in trace order.
    pub fn phase_starts(&self, spec: &str) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEventKind::PhaseStart { spec: s, phase_num, .. } if s == spec => {
                    Some(*phase_num)
                }
                _ => None,
            })
            .collect()
    }

    /// Position of the first `phase_start` of `spec` at `phase_num`.
    pub fn start_index(&self, spec: &str, phase_num: u8) -> Option<usize> {
        self.events.iter().position(|e| {
            matches!(e, TraceEventKind::PhaseStart { spec: s, phase_num: n, .. }
                if s == spec && *n == phase_num)
        })
    }

    /// Position of the first `phase_complete` of `spec` at `phase_num`.
    pub fn complete_index(&self, spec: &str, phase_num: u8) -> Option<usize> {
        self.events.iter().position(|e| {
            matches!(e, TraceEventKind::PhaseComplete { spec: s, phase_num: n, .. }
                if s == spec && *n == phase_num)
        })
    }

    /// Position of the last `phase_complete` of any spec in `specs`.
    pub fn last_completion_of(&self, specs: &[&str]) -> Option<usize> {
        self.events.iter().rposition(|e| {
            matches!(e, TraceEventKind::PhaseComplete { spec, .. } if specs.contains(&spec.as_str()))
        })
    }

    /// Position of the first `phase_complete` of any spec in `specs`.
    pub fn first_completion_of(&self, specs: &[&str]) -> Option<usize> {
        self.events.iter().position(|e| {
            matches!(e, TraceEventKind::PhaseComplete { spec, .. } if specs.contains(&spec.as_str()))
        })
    }

    /// New target numbers recorded for `spec`, in order.
    pub fn target_raises(&self, spec: &str) -> Vec<u8> {
        self.events
            .iter()
            .filter_map(|e| match e {
                TraceEventKind::TargetExtended {
                    spec: s,
                    new_target_num,
                    ..
                } if s == spec => Some(*new_target_num),
                _ => None,
            })
            .collect()
    }

    /// Positions of every `target_extended` event.
    pub fn target_indices(&self, specs: &[&str]) -> Vec<usize> {
        self.events
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                matches!(e, TraceEventKind::TargetExtended { spec, .. } if specs.contains(&spec.as_str()))
            })
            .map(|(i, _)| i)
            .collect()
    }

    /// Number of events named `name` (e.g. `"cache_hit"`) about `spec`.
    pub fn count(&self, name: &str, spec: &str) -> usize {
        self.events
            .iter()
            .filter(|e| e.name() == name && e.spec() == spec)
            .count()
    }
}
