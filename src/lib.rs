//! # ACME 協定引擎
//!
//! 本庫以同步方式實作 ACME（RFC 8555）客戶端，負責與 CA（例如 Let's Encrypt）之間的協定細節：
//!
//! - **client**: 會話 [`client::Acme`]，管理目錄、nonce 快取與已簽章的請求，`badNonce` 會自動重試一次。
//! - **account**: 帳戶註冊、查詢、聯絡資訊更新、停用、金鑰輪替與證書撤銷，支援外部帳戶綁定（EAB）。
//! - **order** / **authorization** / **challenge**: 訂單狀態機與驗證資料（HTTP-01、DNS-01、TLS-ALPN-01）。
//! - **certificate**: 下載的證書鏈，提供到期時間與續約判斷。
//! - **issuance**: 從建立訂單到下載證書的完整流程，驗證資料的部署交給 [`issuance::DomainVerifier`]。
//!
//! 底層元件包括 JWS 簽章（`jws`、`protection`、`signature`）、金鑰（`key_pair`、`jwk`）、
//! CSR（`csr`）與可替換的 HTTP 傳輸層（`transport`）。
//!
//! ## 示例
//!
//! ```no_run
//! use acme_engine::{
//!     account::NewAccount,
//!     challenge::ChallengeType,
//!     client::Acme,
//!     payload::Identifier,
//!     poll::PollSettings,
//! };
//!
//! let acme = Acme::builder()
//!     .directory_url("https://acme-staging-v02.api.letsencrypt.org/directory")
//!     .build()?;
//! let account = acme.register_account(NewAccount::new(true).email("admin@example.com"))?;
//!
//! let mut order = account.new_order(&[Identifier::dns("example.com")], None, None)?;
//! for (identifier, data) in order.verification_data(&account, ChallengeType::Dns01)? {
//!     println!(
//!         "{} TXT {}",
//!         acme_engine::challenge::VerificationData::dns_record_name(&identifier.value),
//!         data.dns_txt_value()
//!     );
//! }
//!
//! let settings = PollSettings::default();
//! order.start_validation(&account, ChallengeType::Dns01)?;
//! order.wait_ready(&account, &settings)?;
//!
//! let csr = order.default_csr()?;
//! order.finalize(&account, &csr)?;
//! order.wait_valid(&account, &settings)?;
//! let certificate = order.download_certificate(&account)?;
//! println!("{}", certificate.full_chain_pem());
//! # Ok::<(), acme_engine::error::Error>(())
//! ```
//!
//! 更多詳細 API 說明請參考各個模組的文檔。

pub mod account;
pub mod authorization;
pub mod base64;
pub mod certificate;
pub mod challenge;
pub mod client;
pub mod csr;
pub mod directory;
pub mod entity;
pub mod error;
pub mod issuance;
pub mod jwk;
pub mod jws;
pub mod key_pair;
pub mod nonce;
pub mod order;
pub mod payload;
pub mod pem;
pub mod poll;
pub mod protection;
pub mod signature;
pub mod transport;
