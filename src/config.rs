// src/config.rs
use crate::domain::errors::{AppError, AppResult};
use crate::exchange::mexc::mexc_interval;
use dotenv::dotenv;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::env;
use std::fs::File;
use std::str::FromStr;

/// Trading bot configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Exchange API credentials
    pub exchange: ExchangeConfig,

    /// Trading configuration
    pub trading: TradingConfig,

    /// Risk management configuration
    pub risk: RiskConfig,

    /// Account-level safety limits
    pub safety: SafetyConfig,

    /// Technical indicator periods
    pub indicators: IndicatorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Exchange API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExchangeConfig {
    /// Exchange name (e.g., "mexc")
    pub name: String,

    /// API key
    pub api_key: String,

    /// API secret
    pub api_secret: String,

    /// REST base URL
    pub base_url: String,

    /// Upper bound for a single exchange request
    pub request_timeout_secs: u64,
}

/// Trading configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingConfig {
    /// Strategy name: "multi_signal" or "fixed_risk"
    pub strategy: String,

    /// Trading symbols (e.g., ["BTCUSDT", "ETHUSDT"])
    pub symbols: Vec<String>,

    /// Candle interval in MEXC notation (e.g., "1m", "5m", "60m", "4h")
    pub interval: String,

    /// Number of candles fetched per symbol each cycle
    pub candle_limit: u32,

    /// Seconds between trading cycles
    pub cycle_interval_secs: u64,

    /// Maximum concurrent market data requests
    pub fetch_concurrency: usize,

    /// Skip order execution and record fills at the analysed price
    pub dry_run: bool,

    /// Account size in USDT used for position sizing
    pub account_balance: Decimal,
}

/// Risk management configuration. Percentages are fractions (0.02 == 2%).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    pub risk_percent: Decimal,
    pub atr_threshold: Decimal,
    pub min_signal_score: u8,
    pub rsi_oversold: f64,
}

/// Limits that sit above the per-trade risk settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SafetyConfig {
    /// Largest USDT amount committed to a single buy
    pub max_position_size: Decimal,

    /// Realized daily loss, as a negative fraction of the day's starting balance,
    /// at which trading pauses
    pub daily_loss_limit: Decimal,
}

/// Technical indicator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndicatorConfig {
    pub ma_short_period: usize,
    pub ma_long_period: usize,
    pub rsi_period: usize,
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,
    pub bollinger_period: usize,
    pub bollinger_std_dev: f64,
    pub stochastic_period: usize,
    pub stochastic_smooth_k: usize,
    pub stochastic_smooth_d: usize,
    pub atr_period: usize,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (e.g., "info", "debug", "warn", "error")
    pub level: String,

    /// Log to file
    pub to_file: bool,

    /// Log file path
    pub file_path: Option<String>,
}

const DEFAULT_SYMBOLS: [&str; 30] = [
    "C4EUSDT", "PONCHUSDT", "GLUTEUUSDT", "BLENDUSDT", "KCSUSDT",
    "WRLDUSDT", "BABYDOGE2USDT", "AGNTUSDT", "LOOPUSDT", "BURGERUSDT",
    "FILUSDT", "TRUMP1USDT", "ATTUSDT", "CELLUSDT", "SHIBAUSDT",
    "RAYUSDC", "GMEUSDT", "SEEDUSDT", "MEMESAIUSDT", "CATDOGUSDT",
    "FLOKIUSDT", "MATHUSDT", "MXUSDT", "ANVLUSDT", "BITCOINAIUSDT",
    "DRIFTUSDT", "MLUSDT", "NEIROETHUSDT", "BOOUSDT", "DMTRUSDT",
];

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse().ok())
        .unwrap_or(default)
}

/// Read a percentage such as `STOP_LOSS_PCT=2` and return it as a fraction.
fn env_percent(key: &str, default_percent: Decimal) -> Decimal {
    env_or(key, default_percent) / Decimal::ONE_HUNDRED
}

impl Config {
    /// Load configuration from environment variables. Call `validate` once logging is up.
    pub fn from_env() -> AppResult<Self> {
        // Load .env file if it exists
        dotenv().ok();

        let defaults = Config::default();

        let exchange_config = ExchangeConfig {
            name: env::var("EXCHANGE_NAME").unwrap_or(defaults.exchange.name),
            api_key: env::var("API_KEY").unwrap_or_default(),
            api_secret: env::var("API_SECRET").unwrap_or_default(),
            base_url: env::var("BASE_URL").unwrap_or(defaults.exchange.base_url),
            request_timeout_secs: env_or(
                "REQUEST_TIMEOUT_SECS",
                defaults.exchange.request_timeout_secs,
            ),
        };

        let symbols = match env::var("TRADING_SYMBOLS") {
            Ok(list) => list
                .split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
            Err(_) => defaults.trading.symbols,
        };

        let trading_config = TradingConfig {
            strategy: env::var("STRATEGY").unwrap_or(defaults.trading.strategy),
            symbols,
            interval: env::var("TRADING_INTERVAL").unwrap_or(defaults.trading.interval),
            candle_limit: env_or("CANDLE_LIMIT", defaults.trading.candle_limit),
            cycle_interval_secs: env_or("CYCLE_INTERVAL_SECS", defaults.trading.cycle_interval_secs),
            fetch_concurrency: env_or("FETCH_CONCURRENCY", defaults.trading.fetch_concurrency),
            dry_run: env_or("DRY_RUN", defaults.trading.dry_run),
            account_balance: env_or("ACCOUNT_BALANCE", defaults.trading.account_balance),
        };

        let risk_config = RiskConfig {
            stop_loss_pct: env_percent("STOP_LOSS_PCT", dec!(2)),
            take_profit_pct: env_percent("TAKE_PROFIT_PCT", dec!(5)),
            trailing_stop_pct: env_percent("TRAILING_STOP_PCT", dec!(1)),
            risk_percent: env_percent("RISK_PERCENT", dec!(1)),
            atr_threshold: env_or("ATR_THRESHOLD", defaults.risk.atr_threshold),
            min_signal_score: env_or("MIN_SIGNAL_SCORE", defaults.risk.min_signal_score),
            rsi_oversold: env_or("RSI_OVERSOLD", defaults.risk.rsi_oversold),
        };

        let safety_config = SafetyConfig {
            max_position_size: env_or("MAX_POSITION_SIZE", defaults.safety.max_position_size),
            daily_loss_limit: env_percent("DAILY_LOSS_LIMIT_PCT", dec!(-10)),
        };

        let logging_config = LoggingConfig {
            level: env::var("LOG_LEVEL").unwrap_or(defaults.logging.level),
            to_file: env_or("LOG_TO_FILE", false),
            file_path: env::var("LOG_FILE_PATH").ok(),
        };

        Ok(Config {
            exchange: exchange_config,
            trading: trading_config,
            risk: risk_config,
            safety: safety_config,
            indicators: defaults.indicators,
            logging: logging_config,
        })
    }

    /// Check the settings the trading core relies on.
    ///
    /// Live trading without credentials falls back to dry run instead of failing.
    pub fn validate(&mut self) -> AppResult<()> {
        if !self.trading.dry_run
            && (self.exchange.api_key.is_empty() || self.exchange.api_secret.is_empty())
        {
            log::warn!("API_KEY/API_SECRET missing, switching to dry run mode");
            self.trading.dry_run = true;
        }

        let mut errors = Vec::new();

        if self.trading.account_balance <= Decimal::ZERO {
            errors.push("ACCOUNT_BALANCE must be greater than 0".to_string());
        }
        if self.risk.risk_percent <= Decimal::ZERO || self.risk.risk_percent > dec!(0.1) {
            errors.push("RISK_PERCENT should be between 0.1 and 10 (%)".to_string());
        }
        for (name, value) in [
            ("STOP_LOSS_PCT", self.risk.stop_loss_pct),
            ("TAKE_PROFIT_PCT", self.risk.take_profit_pct),
            ("TRAILING_STOP_PCT", self.risk.trailing_stop_pct),
        ] {
            if value <= Decimal::ZERO || value >= Decimal::ONE {
                errors.push(format!("{} must be between 0 and 100 (%)", name));
            }
        }
        if self.risk.atr_threshold <= Decimal::ZERO {
            errors.push("ATR_THRESHOLD must be greater than 0".to_string());
        }
        if self.risk.min_signal_score == 0 || self.risk.min_signal_score > 5 {
            errors.push("MIN_SIGNAL_SCORE must be between 1 and 5".to_string());
        }
        if self.trading.symbols.is_empty() {
            errors.push("TRADING_SYMBOLS must list at least one symbol".to_string());
        }
        if !matches!(self.trading.strategy.as_str(), "multi_signal" | "fixed_risk") {
            errors.push(format!("Unknown STRATEGY: {}", self.trading.strategy));
        }
        if self.trading.cycle_interval_secs == 0 {
            errors.push("CYCLE_INTERVAL_SECS must be at least 1".to_string());
        }
        if self.trading.fetch_concurrency == 0 {
            errors.push("FETCH_CONCURRENCY must be at least 1".to_string());
        }
        if self.exchange.name.eq_ignore_ascii_case("mexc") {
            if let Err(e) = mexc_interval(&self.trading.interval) {
                errors.push(e.to_string());
            }
        }
        if self.safety.max_position_size <= Decimal::ZERO {
            errors.push("MAX_POSITION_SIZE must be greater than 0".to_string());
        }
        if self.safety.daily_loss_limit >= Decimal::ZERO || self.safety.daily_loss_limit <= -Decimal::ONE {
            errors.push("DAILY_LOSS_LIMIT_PCT must be between -100 and 0 (%)".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(AppError::Config(errors.join("; ")))
        }
    }

    /// Initialize logging based on configuration
    pub fn init_logging(&self) -> AppResult<()> {
        let mut builder = env_logger::Builder::new();

        // Set log level
        let log_level = match self.logging.level.to_lowercase().as_str() {
            "trace" => log::LevelFilter::Trace,
            "debug" => log::LevelFilter::Debug,
            "info" => log::LevelFilter::Info,
            "warn" => log::LevelFilter::Warn,
            "error" => log::LevelFilter::Error,
            _ => log::LevelFilter::Info,
        };

        builder.filter_level(log_level);

        // Configure output
        if self.logging.to_file {
            if let Some(file_path) = &self.logging.file_path {
                let file = File::create(file_path).map_err(|e| {
                    AppError::Config(format!("Failed to create log file: {}", e))
                })?;

                builder.target(env_logger::Target::Pipe(Box::new(file)));
            }
        }

        builder
            .try_init()
            .map_err(|e| AppError::Config(format!("Failed to initialize logger: {}", e)))?;

        Ok(())
    }
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            ma_short_period: 5,
            ma_long_period: 20,
            rsi_period: 14,
            macd_fast_period: 12,
            macd_slow_period: 26,
            macd_signal_period: 9,
            bollinger_period: 20,
            bollinger_std_dev: 2.0,
            stochastic_period: 14,
            stochastic_smooth_k: 3,
            stochastic_smooth_d: 3,
            atr_period: 14,
        }
    }
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            stop_loss_pct: dec!(0.02),
            take_profit_pct: dec!(0.05),
            trailing_stop_pct: dec!(0.01),
            risk_percent: dec!(0.01),
            atr_threshold: dec!(1.0),
            min_signal_score: 3,
            rsi_oversold: 30.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchange: ExchangeConfig {
                name: "mexc".to_string(),
                api_key: "".to_string(),
                api_secret: "".to_string(),
                base_url: "https://api.mexc.com".to_string(),
                request_timeout_secs: 10,
            },
            trading: TradingConfig {
                strategy: "multi_signal".to_string(),
                symbols: DEFAULT_SYMBOLS.iter().map(|s| s.to_string()).collect(),
                interval: "1m".to_string(),
                candle_limit: 200,
                cycle_interval_secs: 60,
                fetch_concurrency: 5,
                dry_run: true,
                account_balance: dec!(150),
            },
            risk: RiskConfig::default(),
            safety: SafetyConfig {
                max_position_size: dec!(10),
                daily_loss_limit: dec!(-0.10),
            },
            indicators: IndicatorConfig::default(),
            logging: LoggingConfig {
                level: "info".to_string(),
                to_file: false,
                file_path: None,
            },
        }
    }
}
