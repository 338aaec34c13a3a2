use crate::relay::Upstream;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) upstream: Upstream,
    pub(crate) max_body_bytes: usize,
}
