//! Vault state machine and account operations
//!
//! A vault moves through three states: uninitialized (no file on disk),
//! locked (file loaded, no key in memory) and unlocked (password-derived
//! key held in memory). Operations that touch secrets require the unlocked
//! state and re-derive the secret from its sealed envelope on every use;
//! no plaintext secret is cached between calls.

use crate::crypto::{self, EncryptionAlgorithm, VaultKey};
use crate::file::{AccountEntry, AccountOrigin, VaultFile, VAULT_FILE_VERSION};
use crate::{Error, Result};
use obscura_core::classify::CREDITS_PROGRAM;
use obscura_core::{
    Authorization, AuthorizationPair, PrivateKey, RecordCiphertext, RecordPlaintext, ScanKey, Seed,
    Signature,
};
use parking_lot::RwLock;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Sealed at initialization, opened to verify unlock attempts
const CHECK_VALUE: &[u8] = b"obscura-vault-check";

/// Sealing algorithm for new vaults
const DEFAULT_ALGORITHM: EncryptionAlgorithm = EncryptionAlgorithm::ChaCha20Poly1305;

/// Name given to the first derived account
const FIRST_ACCOUNT_NAME: &str = "Account 1";

/// Function paying the fee transition, always from a private record
const FEE_FUNCTION: &str = "fee_private";

/// Maximum account name length in characters
pub const MAX_ACCOUNT_NAME_LENGTH: usize = 32;

/// Vault lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    /// No vault file exists
    Uninitialized,
    /// Vault file exists, key not in memory
    Locked,
    /// Password-derived key held in memory
    Unlocked,
}

/// Public account metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    /// Display name
    pub name: String,
    /// Bech32 address
    pub address: String,
    /// HD derivation index, `None` for imported keys
    pub index: Option<u32>,
    /// Derived or imported
    pub origin: AccountOrigin,
}

impl From<&AccountEntry> for AccountInfo {
    fn from(entry: &AccountEntry) -> Self {
        Self {
            name: entry.name.clone(),
            address: entry.address.clone(),
            index: entry.index,
            origin: entry.origin,
        }
    }
}

struct VaultInner {
    file: Option<VaultFile>,
    key: Option<VaultKey>,
}

/// The encrypted key vault
pub struct Vault {
    path: PathBuf,
    inner: RwLock<VaultInner>,
}

impl Vault {
    /// Open a vault at the given path, loading the file if it exists.
    ///
    /// An existing vault starts locked; a missing file leaves the vault
    /// uninitialized until [`Vault::initialize`] is called.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let file = VaultFile::load(&path)?;

        Ok(Self {
            path,
            inner: RwLock::new(VaultInner { file, key: None }),
        })
    }

    /// Current lifecycle state
    pub fn status(&self) -> VaultStatus {
        let inner = self.inner.read();
        match (&inner.file, &inner.key) {
            (None, _) => VaultStatus::Uninitialized,
            (Some(_), None) => VaultStatus::Locked,
            (Some(_), Some(_)) => VaultStatus::Unlocked,
        }
    }

    /// Whether a vault file exists
    pub fn is_initialized(&self) -> bool {
        self.inner.read().file.is_some()
    }

    /// Whether the key is currently in memory
    pub fn is_unlocked(&self) -> bool {
        self.inner.read().key.is_some()
    }

    /// Whether the vault mnemonic was generated here rather than supplied
    /// at initialization. Supplied seeds may own records older than the
    /// vault itself, which changes where scanning must start.
    pub fn seed_was_generated(&self) -> Result<bool> {
        let inner = self.inner.read();
        let file = inner.file.as_ref().ok_or(Error::Uninitialized)?;
        Ok(file.seed_generated)
    }

    /// Create the vault file, derive the first account and leave the vault
    /// unlocked.
    ///
    /// When `mnemonic` is `None` a fresh 24-word phrase is generated. The
    /// phrase is returned so the caller can present it for backup; it is
    /// never stored in plaintext.
    pub fn initialize(
        &self,
        password: &str,
        mnemonic: Option<&str>,
    ) -> Result<Zeroizing<String>> {
        crypto::validate_password(password)?;

        let mut inner = self.inner.write();
        if inner.file.is_some() {
            return Err(Error::AlreadyInitialized);
        }

        let phrase = match mnemonic {
            Some(phrase) => {
                Seed::validate_mnemonic(phrase)?;
                Zeroizing::new(phrase.to_string())
            }
            None => Zeroizing::new(Seed::generate_mnemonic(None)),
        };
        let seed = Seed::from_mnemonic(&phrase, "")?;

        let salt = crypto::generate_salt();
        let key = crypto::derive_vault_key(password, &salt, DEFAULT_ALGORITHM)?;

        let first = PrivateKey::derive(&seed, 0);
        let entry = seal_entry(&key, FIRST_ACCOUNT_NAME.to_string(), &first, Some(0))?;

        let file = VaultFile {
            version: VAULT_FILE_VERSION,
            algorithm: DEFAULT_ALGORITHM,
            salt: hex::encode(salt),
            check: hex::encode(key.encrypt(CHECK_VALUE)?),
            mnemonic: hex::encode(key.encrypt(phrase.as_bytes())?),
            seed_generated: mnemonic.is_none(),
            accounts: vec![entry],
        };
        file.store(&self.path)?;

        tracing::info!(path = %self.path.display(), "vault initialized");
        inner.file = Some(file);
        inner.key = Some(key);

        Ok(phrase)
    }

    /// Derive the key from the password and verify it against the sealed
    /// check value. Idempotent while already unlocked.
    pub fn unlock(&self, password: &str) -> Result<()> {
        let mut inner = self.inner.write();
        let file = inner.file.as_ref().ok_or(Error::Uninitialized)?;
        if inner.key.is_some() {
            return Ok(());
        }

        let salt = decode_hex(&file.salt)?;
        let key = crypto::derive_vault_key(password, &salt, file.algorithm)?;

        let check = decode_hex(&file.check)?;
        match key.decrypt(&check) {
            Ok(value) if value == CHECK_VALUE => {}
            _ => return Err(Error::InvalidPassword),
        }

        tracing::debug!("vault unlocked");
        inner.key = Some(key);
        Ok(())
    }

    /// Drop the in-memory key. The key bytes are zeroized on drop.
    pub fn lock(&self) {
        let mut inner = self.inner.write();
        if inner.key.take().is_some() {
            tracing::debug!("vault locked");
        }
    }

    /// Derive the next HD account from the mnemonic seed.
    ///
    /// Indices whose derived address already exists in the vault are
    /// skipped, so re-deriving after an import at a colliding address can
    /// never produce a duplicate.
    pub fn create_account(&self, name: &str) -> Result<AccountInfo> {
        validate_account_name(name)?;

        let mut inner = self.inner.write();
        let VaultInner { file, key } = &mut *inner;
        let file = file.as_mut().ok_or(Error::Uninitialized)?;
        let key = key.as_ref().ok_or(Error::Locked)?;

        if file.name_taken(name) {
            return Err(Error::DuplicateAccount(name.to_string()));
        }

        let seed = open_seed(file, key)?;
        let mut index = 0u32;
        let (private_key, index) = loop {
            let candidate = PrivateKey::derive(&seed, index);
            if !file.address_taken(&candidate.address().encode()?) {
                break (candidate, index);
            }
            index += 1;
        };

        let entry = seal_entry(key, name.to_string(), &private_key, Some(index))?;
        let info = AccountInfo::from(&entry);

        let mut updated = file.clone();
        updated.accounts.push(entry);
        updated.store(&self.path)?;
        *file = updated;

        tracing::info!(address = %info.address, index, "account derived");
        Ok(info)
    }

    /// Import an external private key as a new account.
    ///
    /// The key is parsed and validated before anything is stored; a key
    /// whose address is already present is rejected.
    pub fn import_account(&self, name: &str, encoded_key: &str) -> Result<AccountInfo> {
        validate_account_name(name)?;

        let mut inner = self.inner.write();
        let VaultInner { file, key } = &mut *inner;
        let file = file.as_mut().ok_or(Error::Uninitialized)?;
        let key = key.as_ref().ok_or(Error::Locked)?;

        if file.name_taken(name) {
            return Err(Error::DuplicateAccount(name.to_string()));
        }

        let private_key = PrivateKey::from_encoded(encoded_key)?;
        let address = private_key.address().encode()?;
        if file.address_taken(&address) {
            return Err(Error::DuplicateAccount(address));
        }

        let entry = seal_entry(key, name.to_string(), &private_key, None)?;
        let info = AccountInfo::from(&entry);

        let mut updated = file.clone();
        updated.accounts.push(entry);
        updated.store(&self.path)?;
        *file = updated;

        tracing::info!(address = %info.address, "account imported");
        Ok(info)
    }

    /// Rename an account, rejecting duplicates and malformed names
    pub fn rename_account(&self, address: &str, new_name: &str) -> Result<()> {
        validate_account_name(new_name)?;

        let mut inner = self.inner.write();
        let VaultInner { file, key } = &mut *inner;
        let file = file.as_mut().ok_or(Error::Uninitialized)?;
        key.as_ref().ok_or(Error::Locked)?;

        let current = file
            .account(address)
            .ok_or_else(|| Error::AccountNotFound(address.to_string()))?;
        if current.name == new_name {
            return Ok(());
        }
        if file.name_taken(new_name) {
            return Err(Error::DuplicateAccount(new_name.to_string()));
        }

        let mut updated = file.clone();
        match updated.account_mut(address) {
            Some(entry) => entry.name = new_name.to_string(),
            None => return Err(Error::AccountNotFound(address.to_string())),
        }
        updated.store(&self.path)?;
        *file = updated;

        Ok(())
    }

    /// Enumerate accounts in creation order
    pub fn list_accounts(&self) -> Result<Vec<AccountInfo>> {
        self.with_unlocked(|file, _| Ok(file.accounts.iter().map(AccountInfo::from).collect()))
    }

    /// Sign arbitrary bytes with an account's private key
    pub fn sign(&self, address: &str, message: &[u8]) -> Result<Signature> {
        self.with_unlocked(|file, key| {
            let private_key = open_account_key(file, key, address)?;
            Ok(private_key.sign(message))
        })
    }

    /// Decrypt a record ciphertext with an account's view key
    pub fn decrypt_record(
        &self,
        address: &str,
        ciphertext: &RecordCiphertext,
    ) -> Result<RecordPlaintext> {
        self.with_unlocked(|file, key| {
            let private_key = open_account_key(file, key, address)?;
            Ok(ciphertext.open(&private_key.view_key())?)
        })
    }

    /// Derive the serial number an account would publish when spending a
    /// record. Requires the private key, so it lives here rather than in
    /// the sync layer.
    pub fn record_serial_number(
        &self,
        address: &str,
        program_id: &str,
        record_name: &str,
        plaintext: &RecordPlaintext,
    ) -> Result<String> {
        self.with_unlocked(|file, key| {
            let private_key = open_account_key(file, key, address)?;
            Ok(obscura_core::serial_number(
                &private_key,
                program_id,
                record_name,
                plaintext,
            ))
        })
    }

    /// Build the signed authorization pair for one transition.
    ///
    /// The main transition runs `function_name` on `program_id`; the fee
    /// transition always runs the private fee function of the credits
    /// program. The private key never leaves this call.
    pub fn authorize(
        &self,
        address: &str,
        program_id: &str,
        function_name: &str,
        inputs: Vec<serde_json::Value>,
        fee_inputs: Vec<serde_json::Value>,
    ) -> Result<AuthorizationPair> {
        self.with_unlocked(|file, key| {
            let private_key = open_account_key(file, key, address)?;

            let authorization =
                Authorization::build(&private_key, program_id, function_name, inputs, false)?;
            let fee_authorization =
                Authorization::build(&private_key, CREDITS_PROGRAM, FEE_FUNCTION, fee_inputs, true)?;

            Ok(AuthorizationPair {
                authorization,
                fee_authorization,
            })
        })
    }

    /// Scan keys for every account, used by the ownership scanner
    pub fn scan_keys(&self) -> Result<Vec<ScanKey>> {
        self.with_unlocked(|file, key| {
            let mut keys = Vec::with_capacity(file.accounts.len());
            for entry in &file.accounts {
                let private_key = open_entry_key(entry, key)?;
                keys.push(ScanKey::new(private_key.address(), private_key.view_key()));
            }
            Ok(keys)
        })
    }

    fn with_unlocked<T>(&self, f: impl FnOnce(&VaultFile, &VaultKey) -> Result<T>) -> Result<T> {
        let inner = self.inner.read();
        let file = inner.file.as_ref().ok_or(Error::Uninitialized)?;
        let key = inner.key.as_ref().ok_or(Error::Locked)?;
        f(file, key)
    }
}

/// Seal a private key into an account entry
fn seal_entry(
    key: &VaultKey,
    name: String,
    private_key: &PrivateKey,
    index: Option<u32>,
) -> Result<AccountEntry> {
    let encoded = Zeroizing::new(private_key.encode()?);

    Ok(AccountEntry {
        name,
        address: private_key.address().encode()?,
        index,
        origin: match index {
            Some(_) => AccountOrigin::Derived,
            None => AccountOrigin::Imported,
        },
        sealed_key: hex::encode(key.encrypt(encoded.as_bytes())?),
    })
}

/// Open the sealed mnemonic and rebuild the seed
fn open_seed(file: &VaultFile, key: &VaultKey) -> Result<Seed> {
    let sealed = decode_hex(&file.mnemonic)?;
    let phrase = Zeroizing::new(
        String::from_utf8(key.decrypt(&sealed)?).map_err(|e| Error::Crypto(e.to_string()))?,
    );

    Ok(Seed::from_mnemonic(&phrase, "")?)
}

/// Open the sealed private key of one entry
fn open_entry_key(entry: &AccountEntry, key: &VaultKey) -> Result<PrivateKey> {
    let sealed = decode_hex(&entry.sealed_key)?;
    let encoded = Zeroizing::new(
        String::from_utf8(key.decrypt(&sealed)?).map_err(|e| Error::Crypto(e.to_string()))?,
    );

    Ok(PrivateKey::from_encoded(&encoded)?)
}

/// Look up an account by address and open its private key
fn open_account_key(file: &VaultFile, key: &VaultKey, address: &str) -> Result<PrivateKey> {
    let entry = file
        .account(address)
        .ok_or_else(|| Error::AccountNotFound(address.to_string()))?;

    open_entry_key(entry, key)
}

fn decode_hex(value: &str) -> Result<Vec<u8>> {
    hex::decode(value).map_err(|e| Error::Crypto(e.to_string()))
}

fn validate_account_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(Error::InvalidAccountName(
            "name must not be empty".to_string(),
        ));
    }
    if name.trim() != name {
        return Err(Error::InvalidAccountName(
            "name must not start or end with whitespace".to_string(),
        ));
    }
    if name.chars().count() > MAX_ACCOUNT_NAME_LENGTH {
        return Err(Error::InvalidAccountName(format!(
            "name must be at most {} characters",
            MAX_ACCOUNT_NAME_LENGTH
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.'))
    {
        return Err(Error::InvalidAccountName(
            "name may only contain letters, digits, spaces, '-', '_' and '.'".to_string(),
        ));
    }

    Ok(())
}
