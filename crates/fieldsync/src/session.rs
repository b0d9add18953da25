//! Session identity.
//!
//! Logging in happens elsewhere; this module only reads and writes the
//! identity keys it leaves behind in the key-value store.

use std::sync::Arc;

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::debug;

use crate::error::Result;
use crate::form::{FormDefinition, RenderContext};
use crate::storage::Storage;

/// Key holding the logged-in user's id.
pub const LOGGED_IN_USER_KEY: &str = "loggedInUser";
/// Key holding the user's role.
pub const USER_ROLE_KEY: &str = "userRole";
/// Key holding the user's display name.
pub const USER_NAME_DISPLAY_KEY: &str = "userNameDisplay";

/// Identity values currently stored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    /// User id.
    pub logged_in_user: Option<String>,
    /// Role.
    pub user_role: Option<String>,
    /// Display name.
    pub user_name_display: Option<String>,
}

impl SessionInfo {
    /// Whether a user id is stored.
    #[must_use]
    pub fn is_logged_in(&self) -> bool {
        self.logged_in_user.as_deref().is_some_and(|u| !u.is_empty())
    }
}

/// Reads and writes session keys.
#[derive(Debug, Clone)]
pub struct Session {
    store: Arc<Storage>,
}

impl Session {
    /// Create a session view over `store`.
    #[must_use]
    pub fn new(store: Arc<Storage>) -> Self {
        Self { store }
    }

    /// Read the identity keys.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn info(&self) -> Result<SessionInfo> {
        Ok(SessionInfo {
            logged_in_user: self.store.get(LOGGED_IN_USER_KEY)?,
            user_role: self.store.get(USER_ROLE_KEY)?,
            user_name_display: self.store.get(USER_NAME_DISPLAY_KEY)?,
        })
    }

    /// Store an identity, replacing any previous one.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn set(&self, user: &str, role: Option<&str>, display_name: Option<&str>) -> Result<()> {
        self.store.set(LOGGED_IN_USER_KEY, user)?;
        match role {
            Some(role) => self.store.set(USER_ROLE_KEY, role)?,
            None => {
                self.store.remove(USER_ROLE_KEY)?;
            }
        }
        match display_name {
            Some(name) => self.store.set(USER_NAME_DISPLAY_KEY, name)?,
            None => {
                self.store.remove(USER_NAME_DISPLAY_KEY)?;
            }
        }
        debug!("Session set for {}", user);
        Ok(())
    }

    /// Remove every identity key.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be written.
    pub fn clear(&self) -> Result<()> {
        for key in [LOGGED_IN_USER_KEY, USER_ROLE_KEY, USER_NAME_DISPLAY_KEY] {
            self.store.remove(key)?;
        }
        debug!("Session cleared");
        Ok(())
    }

    /// Read any stored value a `fromUser` field may name.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn value(&self, key: &str) -> Result<Option<String>> {
        self.store.get(key)
    }

    /// Build the render context for a new `definition` at `now`.
    ///
    /// Every `fromUser` key the form names is resolved up front; missing keys
    /// render as empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub fn render_context(
        &self,
        definition: &FormDefinition,
        now: NaiveDateTime,
    ) -> Result<RenderContext> {
        let mut ctx = RenderContext::new(now);
        for key in definition.fields.iter().filter_map(|f| f.from_user.as_deref()) {
            if let Some(value) = self.value(key)? {
                ctx = ctx.with_user_value(key, value);
            }
        }
        Ok(ctx)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::form::FormView;

    fn session() -> Session {
        Session::new(Arc::new(Storage::open_in_memory().unwrap()))
    }

    #[test]
    fn test_empty_session() {
        let info = session().info().unwrap();
        assert_eq!(info, SessionInfo::default());
        assert!(!info.is_logged_in());
    }

    #[test]
    fn test_set_and_clear() {
        let session = session();
        session.set("u42", Some("enumerator"), Some("Amina")).unwrap();

        let info = session.info().unwrap();
        assert!(info.is_logged_in());
        assert_eq!(info.user_role.as_deref(), Some("enumerator"));
        assert_eq!(info.user_name_display.as_deref(), Some("Amina"));

        session.set("u43", None, None).unwrap();
        let info = session.info().unwrap();
        assert_eq!(info.logged_in_user.as_deref(), Some("u43"));
        assert!(info.user_role.is_none());

        session.clear().unwrap();
        assert_eq!(session.info().unwrap(), SessionInfo::default());
    }

    #[test]
    fn test_render_context_fills_from_user_fields() {
        let session = session();
        session.set("u42", Some("enumerator"), Some("Amina")).unwrap();

        let definition = FormDefinition::from_json(
            "test",
            r#"{"formId": "health", "title": "Health", "fields": [
                {"name": "enumerator", "label": "Enumerator", "type": "text", "fromUser": "userNameDisplay"},
                {"name": "supervisor", "label": "Supervisor", "type": "text", "fromUser": "supervisorName"}
            ]}"#,
        )
        .unwrap();
        let now = NaiveDate::from_ymd_opt(2024, 3, 5)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap();

        let ctx = session.render_context(&definition, now).unwrap();
        let view = FormView::render(&definition, None, &ctx);

        assert_eq!(view.field("enumerator").unwrap().value, "Amina");
        assert_eq!(view.field("supervisor").unwrap().value, "");
    }
}
