use std::future::Future;

use crate::error::Error;
use crate::types::ProviderUser;

/// External identity provider (Firebase Authentication).
///
/// The provider keeps its own signed-in user; `id_token` and
/// `link_email_password` act on that user. Failures are reported as
/// [`Error::Provider`] with a normalized code.
pub trait IdentityProvider: Send + Sync + 'static {
    fn sign_in_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<ProviderUser, Error>> + Send;

    fn create_user_with_email(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<ProviderUser, Error>> + Send;

    fn sign_in_anonymously(&self) -> impl Future<Output = Result<ProviderUser, Error>> + Send;

    /// ID token of the current provider user; `force_refresh` mints a new one.
    fn id_token(&self, force_refresh: bool) -> impl Future<Output = Result<String, Error>> + Send;

    /// Attaches email/password credentials to the current (anonymous) user,
    /// keeping its uid.
    fn link_email_password(
        &self,
        email: &str,
        password: &str,
    ) -> impl Future<Output = Result<ProviderUser, Error>> + Send;

    fn send_password_reset_email(&self, email: &str)
    -> impl Future<Output = Result<(), Error>> + Send;

    fn sign_out(&self) -> impl Future<Output = Result<(), Error>> + Send;
}
