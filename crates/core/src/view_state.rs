use crate::error::BerthError;

/// Lifecycle of an asynchronously fetched value as shown to presentation layers.
///
/// `Reloading` and `Failure` carry the most recent successful payload, so a refresh or a failed
/// refresh never hides data that was already on screen. `Loading` means nothing was ever fetched.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewState<T> {
    Loading,
    Reloading(T),
    Success(T),
    Failure { error: BerthError, stale: Option<T> },
}

impl<T> Default for ViewState<T> {
    fn default() -> Self {
        ViewState::Loading
    }
}

impl<T> ViewState<T> {
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ViewState<U> {
        match self {
            ViewState::Loading => ViewState::Loading,
            ViewState::Reloading(v) => ViewState::Reloading(f(v)),
            ViewState::Success(v) => ViewState::Success(f(v)),
            ViewState::Failure { error, stale } => ViewState::Failure { error, stale: stale.map(f) },
        }
    }

    pub fn as_ref(&self) -> ViewState<&T> {
        match self {
            ViewState::Loading => ViewState::Loading,
            ViewState::Reloading(v) => ViewState::Reloading(v),
            ViewState::Success(v) => ViewState::Success(v),
            ViewState::Failure { error, stale } => ViewState::Failure { error: error.clone(), stale: stale.as_ref() },
        }
    }

    /// Current or stale payload, if any.
    pub fn unwrapped_value(&self) -> Option<&T> {
        match self {
            ViewState::Loading => None,
            ViewState::Reloading(v) | ViewState::Success(v) => Some(v),
            ViewState::Failure { stale, .. } => stale.as_ref(),
        }
    }

    pub fn into_value(self) -> Option<T> {
        match self {
            ViewState::Loading => None,
            ViewState::Reloading(v) | ViewState::Success(v) => Some(v),
            ViewState::Failure { stale, .. } => stale,
        }
    }

    /// State to show while this value is being refreshed.
    pub fn reloading_projection(self) -> ViewState<T> {
        match self.into_value() {
            Some(v) => ViewState::Reloading(v),
            None => ViewState::Loading,
        }
    }

    /// Failure keeping whatever payload this state holds as stale.
    pub fn failed(self, error: BerthError) -> ViewState<T> {
        ViewState::Failure { error, stale: self.into_value() }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, ViewState::Loading | ViewState::Reloading(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, ViewState::Success(_))
    }

    pub fn error(&self) -> Option<&BerthError> {
        match self {
            ViewState::Failure { error, .. } => Some(error),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;

    fn err() -> BerthError {
        BerthError::Transport(TransportError::Network("offline".into()))
    }

    #[test]
    fn failure_with_stale_reloads_from_stale() {
        let s = ViewState::Failure { error: err(), stale: Some(3) };
        assert_eq!(s.reloading_projection(), ViewState::Reloading(3));
    }

    #[test]
    fn loading_stays_loading() {
        assert_eq!(ViewState::<u8>::Loading.reloading_projection(), ViewState::Loading);
        let s: ViewState<u8> = ViewState::Failure { error: err(), stale: None };
        assert_eq!(s.reloading_projection(), ViewState::Loading);
    }

    #[test]
    fn success_never_drops_to_loading() {
        assert_eq!(ViewState::Success("v").reloading_projection(), ViewState::Reloading("v"));
        assert_eq!(ViewState::Reloading("v").reloading_projection(), ViewState::Reloading("v"));
    }

    #[test]
    fn map_preserves_case() {
        assert_eq!(ViewState::Success(2).map(|v| v * 10), ViewState::Success(20));
        assert_eq!(ViewState::Reloading(2).map(|v| v + 1), ViewState::Reloading(3));
        let f = ViewState::Failure { error: err(), stale: Some(1) }.map(|v| v.to_string());
        assert_eq!(f, ViewState::Failure { error: err(), stale: Some("1".to_string()) });
        assert_eq!(ViewState::<u8>::Loading.map(|v| v), ViewState::Loading);
    }

    #[test]
    fn failed_keeps_payload() {
        let s = ViewState::Success(vec![1, 2]).failed(err());
        assert_eq!(s.unwrapped_value(), Some(&vec![1, 2]));
        assert_eq!(s.error(), Some(&err()));
        assert!(!s.is_loading());
    }
}
