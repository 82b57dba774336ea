/// Service configuration from environment variables
///
/// Controls the coordination tunables (gap limits, lock budgets, backoff),
/// the explorer/hub endpoints and the HTTP bind address.
use std::env;
use std::time::Duration;

#[derive(Clone, Debug)]
pub struct Config {
    /// HTTP bind address for the API server
    pub bind_addr: String,
    /// Ledger explorer base URL
    pub explorer_url: String,
    /// Hub base URL for joint broadcast
    pub hub_url: String,
    /// Deadline applied to outbound explorer/hub calls
    pub request_timeout: Duration,
    /// Minimum supported client version ("owc-" prefixed semver)
    pub min_client_version: String,
    /// Copayer ids granted the support-staff wallet override
    pub support_staff: Vec<String>,

    /// Cap on a copayer's request-public-key history
    pub max_keys: usize,
    /// Removal cooldown after a foreign action on a proposal (seconds)
    pub delete_locktime: i64,
    /// Consecutive trailing rejections that arm the creation backoff
    pub backoff_offset: usize,
    /// Backoff cooldown after the arming rejection (seconds)
    pub backoff_time: i64,
    /// Consecutive inactive receive addresses before createAddress refuses
    pub max_main_address_gap: u32,
    /// Consecutive inactive addresses that stop a scan
    pub scan_address_gap: u32,
    /// Session sliding-expiration window (seconds)
    pub session_expiration: i64,
    /// Maximum rows a single history query may request
    pub history_limit: usize,
    /// Balance cache lifetime
    pub balance_cache_duration: Duration,
    /// Hard cap on the notification query window (seconds)
    pub max_notifications_timespan: i64,
    /// Default notification query window (seconds)
    pub notifications_timespan: i64,
    /// Lock acquisition wait budget
    pub lock_wait_time: Duration,
    /// Lock auto-expiry once held
    pub lock_exe_time: Duration,
    /// Window of the broadcast log consulted for the spent view (seconds)
    pub broadcast_log_window: i64,
    /// Maximum broadcast-log entries consulted for the spent view
    pub broadcast_log_cap: usize,
    /// How far back a fiat-rate query may match (seconds)
    pub fiat_rate_max_look_back: i64,
    /// Fiat-rate fetch cadence for an external scraper (seconds)
    pub fiat_rate_fetch_interval: i64,
    /// Wallet creations allowed per source IP per hour
    pub create_wallet_rate_limit: usize,
    /// Creations per hour after which responses slow down
    pub create_wallet_slow_down_after: usize,
}

impl Config {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `BIND_ADDR`: HTTP listen address (default "127.0.0.1:3232")
    /// - `EXPLORER_URL`: explorer endpoint (default "http://localhost:4000")
    /// - `HUB_URL`: hub endpoint (default "http://localhost:4000")
    /// - `MIN_CLIENT_VERSION`: minimum supported client (default "owc-1.0.0")
    /// - `SUPPORT_STAFF`: comma-separated copayer ids granted the wallet
    ///   override (default none)
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(addr) = env::var("BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Ok(url) = env::var("EXPLORER_URL") {
            config.explorer_url = url;
        }
        if let Ok(url) = env::var("HUB_URL") {
            config.hub_url = url;
        }
        if let Ok(version) = env::var("MIN_CLIENT_VERSION") {
            config.min_client_version = version;
        }
        if let Ok(staff) = env::var("SUPPORT_STAFF") {
            config.support_staff = staff
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
            log::info!("{} support-staff copayers configured", config.support_staff.len());
        }
        if let Some(secs) = env_u64("REQUEST_TIMEOUT_SECS") {
            config.request_timeout = Duration::from_secs(secs);
        }
        if let Some(gap) = env_u64("MAX_MAIN_ADDRESS_GAP") {
            config.max_main_address_gap = gap as u32;
            config.scan_address_gap = gap as u32 + 10;
        }

        log::info!("explorer: {}", config.explorer_url);
        log::info!("hub: {}", config.hub_url);
        log::info!(
            "lock budgets: wait {:?}, hold {:?}",
            config.lock_wait_time,
            config.lock_exe_time
        );

        config
    }

    /// Server-side task wrap budget, 1.5x the lock hold time.
    pub fn server_exe_time(&self) -> Duration {
        self.lock_exe_time + self.lock_exe_time / 2
    }
}

fn env_u64(key: &str) -> Option<u64> {
    env::var(key).ok().and_then(|s| s.parse().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:3232".to_string(),
            explorer_url: "http://localhost:4000".to_string(),
            hub_url: "http://localhost:4000".to_string(),
            request_timeout: Duration::from_secs(30),
            min_client_version: "owc-1.0.0".to_string(),
            support_staff: Vec::new(),
            max_keys: 100,
            delete_locktime: 600,
            backoff_offset: 10,
            backoff_time: 600,
            max_main_address_gap: 20,
            scan_address_gap: 30,
            session_expiration: 3600,
            history_limit: 2000,
            balance_cache_duration: Duration::from_secs(10),
            max_notifications_timespan: 60 * 60 * 24 * 14,
            notifications_timespan: 60,
            lock_wait_time: Duration::from_secs(5),
            lock_exe_time: Duration::from_secs(40),
            broadcast_log_window: 24 * 3600,
            broadcast_log_cap: 100,
            fiat_rate_max_look_back: 120 * 60,
            fiat_rate_fetch_interval: 600,
            create_wallet_rate_limit: 15,
            create_wallet_slow_down_after: 8,
        }
    }
}
