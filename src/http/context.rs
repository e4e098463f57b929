use std::ops::Deref;

use axum::extract::FromRef;

use crate::server::Server;

#[derive(Clone, FromRef)]
pub struct WebContext(pub(crate) Server);

impl Deref for WebContext {
    type Target = Server;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl WebContext {
    pub fn new(server: Server) -> Self {
        Self(server)
    }
}
