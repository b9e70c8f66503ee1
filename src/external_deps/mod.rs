//! Integrations that rely on third-party services.
//!
//! Currently this is the captcha-solving vendor used to obtain the reCAPTCHA
//! token the portal's login endpoint requires.

pub mod captcha;

pub use captcha::{CaptchaProvider, TwoCaptchaProvider};
