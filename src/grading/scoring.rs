//! Answer-key matching.

use crate::assessment::Item;
use crate::session::model::{Answer, GradedAnswer, Score};

/// Whether `answer` matches one of the item's accepted alternatives.
///
/// Both sides are trimmed; the comparison is otherwise exact, so `"3.50"`
/// does not match a key of `"3.5"`.
#[must_use]
pub fn is_correct(item: &Item, answer: &str) -> bool {
    let answer = answer.trim();
    !answer.is_empty() && item.accepted_alternatives().contains(&answer)
}

/// Grades every item in `items` against the candidate's answers.
///
/// Items without an answer are graded incorrect with an empty value; answers
/// for ids not in `items` are ignored.
#[must_use]
pub fn grade<'a>(
    items: &[Item],
    answers: impl IntoIterator<Item = &'a Answer>,
) -> (Vec<GradedAnswer>, Score) {
    let by_id: std::collections::HashMap<&str, &Answer> = answers
        .into_iter()
        .map(|a| (a.item_id.as_str(), a))
        .collect();

    let graded: Vec<GradedAnswer> = items
        .iter()
        .map(|item| {
            let answer = by_id.get(item.id.as_str());
            let value = answer.map_or("", |a| a.value.trim());
            GradedAnswer {
                item_id: item.id.clone(),
                value: value.to_string(),
                correct: is_correct(item, value),
                marked_for_review: answer.is_some_and(|a| a.marked_for_review),
            }
        })
        .collect();

    let correct = graded.iter().filter(|g| g.correct).count();
    let score = Score {
        correct: u32::try_from(correct).unwrap_or(u32::MAX),
        total: u32::try_from(graded.len()).unwrap_or(u32::MAX),
    };
    (graded, score)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;
    use crate::assessment::tests::item;

    fn answer(id: &str, value: &str) -> Answer {
        Answer {
            item_id: id.to_string(),
            value: value.to_string(),
            marked_for_review: false,
        }
    }

    #[test]
    fn alternatives_accept_each_variant() {
        let q = item("q4", "3.5|7/2");
        assert!(is_correct(&q, "3.5"));
        assert!(is_correct(&q, "7/2"));
        assert!(is_correct(&q, "  7/2 "));
        assert!(!is_correct(&q, "3.50"));
        assert!(!is_correct(&q, ""));
    }

    #[test]
    fn grade_covers_every_item() {
        let items = vec![item("q1", "B"), item("q2", "C"), item("q3", "A")];
        let mut marked = answer("q2", " C ");
        marked.marked_for_review = true;
        let answers = vec![answer("q1", "A"), marked, answer("zz", "A")];

        let (graded, score) = grade(&items, &answers);

        assert_eq!(score, Score { correct: 1, total: 3 });
        assert_eq!(graded.len(), 3);
        assert!(!graded[0].correct);
        assert!(graded[1].correct);
        assert_eq!(graded[1].value, "C");
        assert!(graded[1].marked_for_review);
        assert_eq!(graded[2].value, "");
        assert!(!graded[2].correct);
    }

    proptest! {
        #[test]
        fn surrounding_whitespace_never_matters(
            key in "[A-Za-z0-9./]{1,8}",
            left in "[ \t]{0,3}",
            right in "[ \t]{0,3}",
        ) {
            let q = item("q", &format!(" {key} |other"));
            let padded = format!("{left}{key}{right}");
            prop_assert!(is_correct(&q, &padded));
        }

        #[test]
        fn only_listed_alternatives_match(
            keys in proptest::collection::vec("[a-z]{1,4}", 1..4),
            guess in "[a-z]{1,4}",
        ) {
            let q = item("q", &keys.join("|"));
            prop_assert_eq!(is_correct(&q, &guess), keys.contains(&guess));
        }
    }
}
