//! # recipe_install
//!
//! Acquisition of the IaC tool binary from a release registry or a direct
//! archive URL.
//!
//! # Protocol
//!
//! 1. Resolve the artifact: either the archive URL as given, or a lookup in
//!    `{base}/{product}/index.json` for the requested version and the
//!    running platform.
//! 2. Download it into a temporary file inside the install directory.
//! 3. Verify its SHA-256 digest against the release checksum manifest.
//! 4. Extract the single executable member, refusing any member name that
//!    could escape the install directory.
//!
//! Every request goes through [`retry`] with exponential backoff and honours
//! a [`Cancellation`] signal. The HTTP layer sits behind [`HttpTransport`] so
//! tests can run without a network.
//!
//! # Example
//!
//! ```rust,no_run
//! use recipe_install::{Cancellation, InstallSpec, Installer, ToolInstaller};
//!
//! # async fn demo() -> recipe_install::InstallResult<()> {
//! let spec = InstallSpec::new("terraform", "/tmp/recipe/install")
//!     .version("1.6.6")
//!     .base_url("https://releases.hashicorp.com");
//!
//! let binary = Installer::new().install(&spec, &Cancellation::never()).await?;
//! println!("installed at {}", binary.display());
//! # Ok(())
//! # }
//! ```

pub mod checksum;
pub mod error;
pub mod extract;
pub mod index;
pub mod installer;
pub mod retry;
pub mod spec;
pub mod transport;

pub use error::{InstallError, InstallResult};
pub use index::{Platform, ReleaseBuild, ReleaseIndex, ReleaseVersion};
pub use installer::{DownloadArtifact, Installer, ToolInstaller};
pub use retry::{cancellation, retry, CancelHandle, Cancellation, RetryPolicy};
pub use spec::{InstallSpec, DEFAULT_RELEASES_URL, DEFAULT_REQUEST_TIMEOUT};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport, StaticTransport};
