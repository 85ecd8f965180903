use serde::{Deserialize, Serialize};

/// Output language threaded through every oracle call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Language {
    #[serde(rename = "uz-L")]
    #[default]
    UzbekLatin,
    #[serde(rename = "uz-C")]
    UzbekCyrillic,
    #[serde(rename = "kaa")]
    Karakalpak,
    #[serde(rename = "ru")]
    Russian,
    #[serde(rename = "en")]
    English,
}

impl Language {
    /// Name used inside prompts ("Output Language: ...")
    pub fn prompt_name(&self) -> &'static str {
        match self {
            Language::UzbekLatin => "Uzbek (Latin script)",
            Language::UzbekCyrillic => "Uzbek (Cyrillic script)",
            Language::Karakalpak => "Karakalpak (Latin script)",
            Language::Russian => "Russian",
            Language::English => "English",
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Language::UzbekLatin => "uz-L",
            Language::UzbekCyrillic => "uz-C",
            Language::Karakalpak => "kaa",
            Language::Russian => "ru",
            Language::English => "en",
        }
    }

    pub fn council_gathering(&self) -> &'static str {
        match self {
            Language::UzbekLatin => "O'zbekiston yetakchi tibbiyot mutaxassislari yig'ilmoqda...",
            Language::UzbekCyrillic => "Ўзбекистон етакчи тиббиёт мутахассислари йиғилмоқда...",
            Language::Karakalpak => "Qaraqalpaqstan jetekshi medicina qaniygelari jıynalmaqta...",
            Language::Russian => "Ведущие медицинские специалисты собираются...",
            Language::English => "Leading medical specialists are gathering...",
        }
    }

    pub fn round_starting(&self, round: usize) -> String {
        match self {
            Language::UzbekLatin => format!("{round}-bosqich munozarasi boshlanmoqda..."),
            Language::UzbekCyrillic => format!("{round}-босқич мунозараси бошланмоқда..."),
            Language::Karakalpak => format!("{round}-basqısh munozarası baslanbaqta..."),
            Language::Russian => format!("Начинается {round}-й раунд обсуждения..."),
            Language::English => format!("Round {round} of debate starting..."),
        }
    }

    pub fn preparing_report(&self) -> &'static str {
        match self {
            Language::UzbekLatin => "Yakuniy hisobot tayyorlanmoqda...",
            Language::UzbekCyrillic => "Якуний ҳисобот тайёрланмоқда...",
            Language::Karakalpak => "Juwmaqlawshı esabat tayarlanbaqta...",
            Language::Russian => "Подготовка итогового отчета...",
            Language::English => "Preparing final report...",
        }
    }

    pub(crate) fn friendly(&self, kind: FriendlyKind) -> &'static str {
        use FriendlyKind::*;
        match (self, kind) {
            (Language::Russian, Network) => {
                "Проблема с интернет-соединением. Проверьте подключение и повторите попытку."
            }
            (Language::Russian, Overloaded) => {
                "Сервер ИИ сейчас перегружен. Повторите попытку через 10–15 секунд."
            }
            (Language::Russian, Truncated) => "Ответ ИИ пришёл не полностью. Повторите попытку.",
            (Language::Russian, Timeout) => "Время запроса истекло. Повторите попытку.",
            (Language::Russian, RateLimit) => "Слишком много запросов. Подождите немного.",
            (Language::Russian, Generic) => "Проблема с сервисом ИИ. Повторите попытку позже.",

            (Language::English, Network) => {
                "Internet connection problem. Please check your connection and try again."
            }
            (Language::English, Overloaded) => {
                "The AI server is busy. Please try again in 10-15 seconds."
            }
            (Language::English, Truncated) => "The AI response was incomplete. Please try again.",
            (Language::English, Timeout) => "The request timed out. Please try again.",
            (Language::English, RateLimit) => "Too many requests. Please wait a moment.",
            (Language::English, Generic) => "The AI service had a problem. Please try again later.",

            (Language::UzbekCyrillic, Network) => {
                "Интернет алоқаси билан муаммо. Интернетни текширинг ва қайта уриниб кўринг."
            }
            (Language::UzbekCyrillic, Overloaded) => {
                "ИИ сервер ҳозир банд. 10–15 сониядан кейин қайта уриниб кўринг."
            }
            (Language::UzbekCyrillic, Truncated) => {
                "ИИ жавоби тўлиқ келмади. Қайта уриниб кўринг."
            }
            (Language::UzbekCyrillic, Timeout) => "Сўров вақти тугади. Қайта уриниб кўринг.",
            (Language::UzbekCyrillic, RateLimit) => {
                "Сўровлар сони чекланган. Бироз кутинг."
            }
            (Language::UzbekCyrillic, Generic) => "ИИ хизмати билан муаммо юз берди.",

            (_, Network) => {
                "Internet aloqasi bilan muammo. Iltimos, internetni tekshiring va qayta urinib ko'ring."
            }
            (_, Overloaded) => "AI server hozir band. Iltimos, 10–15 soniyadan keyin qayta urinib ko'ring.",
            (_, Truncated) => "AI javobi to'liq kelmadi. Iltimos, qayta urinib ko'ring.",
            (_, Timeout) => "So'rov vaqti tugadi. Iltimos, qayta urinib ko'ring.",
            (_, RateLimit) => "So'rovlar soni cheklangan. Iltimos, biroz kuting va qayta urinib ko'ring.",
            (_, Generic) => "AI xizmati bilan muammo yuz berdi.",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum FriendlyKind {
    Network,
    Overloaded,
    Truncated,
    Timeout,
    RateLimit,
    Generic,
}

/// Maps a raw failure message to a short localized message safe to show a clinician
pub fn user_friendly_message(raw: &str, language: Language) -> String {
    let message = raw.to_lowercase();
    let kind = if message.contains("network")
        || message.contains("fetch")
        || message.contains("connection")
    {
        FriendlyKind::Network
    } else if message.contains("503")
        || message.contains("overloaded")
        || message.contains("unavailable")
    {
        FriendlyKind::Overloaded
    } else if message.contains(crate::error::PARSE_FAILURE_MARKER)
        || message.contains("invalid json")
        || message.contains("failed to parse")
    {
        FriendlyKind::Truncated
    } else if message.contains("timeout") || message.contains("timed out") {
        FriendlyKind::Timeout
    } else if message.contains("rate limit") || message.contains("quota") || message.contains("429")
    {
        FriendlyKind::RateLimit
    } else {
        FriendlyKind::Generic
    };
    language.friendly(kind).to_string()
}
