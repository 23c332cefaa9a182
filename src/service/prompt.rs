//! Prompt construction for the generation collaborator
//!
//! Prompts are Russian because the corpus and the audience are; the bracketed
//! `[n]` source indices must line up with the order of `sources`.

/// Source material handed to the model: contract fields plus excerpt text
#[derive(Debug, Clone)]
pub struct PromptSource {
    pub title: String,
    pub url: String,
    pub author: String,
    pub date: String,
    pub topic: String,
    pub excerpt: String,
}

pub struct PromptBuilder;

impl PromptBuilder {
    /// Grounded multi-sentence summary citing bracketed source indices
    pub fn build_summary(query: &str, sources: &[PromptSource]) -> String {
        let blocks: Vec<String> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "[{}] {}\nURL: {}\nАвтор: {}\nДата: {}\nТематика: {}\nФрагменты:\n{}\n",
                    i + 1,
                    s.title,
                    s.url,
                    s.author,
                    s.date,
                    s.topic,
                    s.excerpt
                )
            })
            .collect();

        let rules = "Ты — AI-агент для поиска и анализа статей технологических СМИ.\n\
            Этичность и точность:\n\
            - Используй ТОЛЬКО предоставленные фрагменты.\n\
            - Не выдумывай факты. Если данных нет — явно скажи об этом.\n\
            - На каждое значимое утверждение ставь ссылку [n].\n\
            - Не раскрывай персональные данные, которых нет в источниках.\n\n\
            Формат ответа:\n\
            1) Короткое аннотационное резюме (3–7 предложений).\n\
            2) Строка: Источники: [1][2]...[k]\n";

        format!(
            "{rules}\nЗапрос: {query}\n\nИсточники:\n{}\n\nСформируй аннотационное резюме по запросу.\n",
            blocks.join("\n")
        )
    }

    /// Fixed-format multiple-choice quiz referencing each used source
    pub fn build_quiz(title: &str, sources: &[PromptSource], n_questions: usize) -> String {
        let blocks: Vec<String> = sources
            .iter()
            .enumerate()
            .map(|(i, s)| {
                format!(
                    "[{}] {}\nURL: {}\nФрагменты:\n{}\n",
                    i + 1,
                    s.title,
                    s.url,
                    s.excerpt
                )
            })
            .collect();

        let rules = format!(
            "Ты — AI-агент. Сгенерируй мини-тест по материалам источников.\n\
            Правила:\n\
            - Используй только источники ниже, не выдумывай.\n\
            - Каждый вопрос должен иметь ссылку [n] на источник.\n\
            - Формат: Вопрос, 4 варианта (A–D), правильный ответ, краткое объяснение.\n\
            - Количество вопросов: {n_questions}.\n\
            - В конце: Источники: [1][2]...[k]\n"
        );

        format!(
            "{rules}\nЗапрос: {title}\n\nИсточники:\n{}\n\nСгенерируй тест.\n",
            blocks.join("\n")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(n: u32) -> PromptSource {
        PromptSource {
            title: format!("Статья {n}"),
            url: format!("https://example.com/{n}"),
            author: "Автор".into(),
            date: "2024-01-01".into(),
            topic: "ИИ".into(),
            excerpt: format!("Фрагмент {n}"),
        }
    }

    #[test]
    fn summary_prompt_numbers_sources_in_order() {
        let prompt = PromptBuilder::build_summary("запрос", &[source(1), source(2)]);
        let idx1 = prompt.find("[1] Статья 1").unwrap();
        let idx2 = prompt.find("[2] Статья 2").unwrap();
        assert!(idx1 < idx2);
        assert!(prompt.contains("Запрос: запрос"));
    }

    #[test]
    fn quiz_prompt_carries_question_count() {
        let prompt = PromptBuilder::build_quiz("Тест", &[source(1)], 7);
        assert!(prompt.contains("Количество вопросов: 7"));
        assert!(prompt.contains("[1] Статья 1"));
    }
}
