use crate::models::Recipe;
use printpdf::*;
use std::io::BufWriter;

const PAGE_W: f32 = 210.0;
const PAGE_H: f32 = 297.0;
const MARGIN: f32 = 15.0;
const LINE: f32 = 6.0;

/// Text-only recipe card. Builtin fonts cover Latin script only.
pub fn generate_pdf(recipe: &Recipe) -> Result<Vec<u8>, printpdf::Error> {
    let (doc, page, layer) = PdfDocument::new(truncate(&recipe.name, 48), Mm(PAGE_W), Mm(PAGE_H), "Layer 1");
    let font = doc.add_builtin_font(BuiltinFont::Helvetica)?;
    let bold = doc.add_builtin_font(BuiltinFont::HelveticaBold)?;

    let mut current = doc.get_page(page).get_layer(layer);
    let mut y = PAGE_H - 22.0;
    let mut page_no = 1;

    current.use_text(&recipe.name, 20.0, Mm(MARGIN), Mm(y), &bold);
    y -= LINE * 1.5;

    let mut facts = Vec::new();
    if let Some(servings) = recipe.meta.servings {
        facts.push(format!("Serves {servings}"));
    }
    if let Some(prep) = recipe.meta.prep_time {
        facts.push(format!("Prep {prep} min"));
    }
    if let Some(cook) = recipe.meta.cook_time {
        facts.push(format!("Cook {cook} min"));
    }
    if let Some(cuisine) = &recipe.meta.cuisine {
        facts.push(cuisine.clone());
    }
    if !facts.is_empty() {
        current.use_text(facts.join("  |  "), 10.0, Mm(MARGIN), Mm(y), &font);
        y -= LINE * 1.5;
    }

    let sections = [
        (&recipe.ingredients_label, &recipe.ingredients, false),
        (&recipe.instructions_label, &recipe.instructions, true),
    ];
    for (label, items, numbered) in sections {
        let mut lines = vec![(label.to_string(), 14.0, true)];
        lines.extend(items.iter().enumerate().map(|(i, item)| {
            let text = if numbered { format!("{}. {}", i + 1, item) } else { format!("- {item}") };
            (truncate(&text, 95), 10.0, false)
        }));
        for (text, size, heading) in lines {
            if y < 20.0 {
                page_no += 1;
                let (p, l) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), format!("Page {page_no}"));
                current = doc.get_page(p).get_layer(l);
                y = PAGE_H - 20.0;
            }
            current.use_text(text, size, Mm(MARGIN), Mm(y), if heading { &bold } else { &font });
            y -= LINE;
        }
        y -= LINE / 2.0;
    }

    if let Some(notes) = recipe.notes.as_deref().filter(|n| !n.trim().is_empty()) {
        if y < 20.0 {
            page_no += 1;
            let (p, l) = doc.add_page(Mm(PAGE_W), Mm(PAGE_H), format!("Page {page_no}"));
            current = doc.get_page(p).get_layer(l);
            y = PAGE_H - 20.0;
        }
        current.use_text(format!("Notes: {}", truncate(notes, 90)), 9.0, Mm(MARGIN), Mm(y), &font);
    }

    let mut buf: Vec<u8> = Vec::new();
    {
        let mut writer = BufWriter::new(&mut buf);
        doc.save(&mut writer)?;
    }
    Ok(buf)
}

fn truncate(s: &str, max: usize) -> String {
    match s.char_indices().nth(max) {
        Some((i, _)) => format!("{}…", &s[..i]),
        None => s.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RecipeMeta, RecipeStatus};
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn renders_a_pdf_document() {
        let recipe = Recipe {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            name: "Banana bread".into(),
            ingredients: (0..40).map(|i| format!("ingredient {i}")).collect(),
            instructions: vec!["mash".into(), "bake".into()],
            is_rtl: false,
            ingredients_label: "Ingredients".into(),
            instructions_label: "Instructions".into(),
            content: None,
            is_favorite: false,
            rating: 0,
            status: RecipeStatus::Accepted,
            notes: Some("use very ripe bananas".into()),
            created_at: Utc::now(),
            meta: RecipeMeta { servings: Some(8), ..Default::default() },
            likes: 0,
            author_name: None,
            is_public: false,
            published_at: None,
        };
        let bytes = generate_pdf(&recipe).unwrap();
        assert!(bytes.starts_with(b"%PDF"));
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("שקשוקה", 3), "שקש…");
        assert_eq!(truncate("soup", 10), "soup");
    }
}
