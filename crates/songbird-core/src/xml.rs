//! Small XML helpers shared by the SOAP client and the metadata parser.

use std::collections::HashMap;

use quick_xml::events::{ BytesStart, Event };
use quick_xml::Reader;


/// Finds the first element whose local name is `parent` and returns the text
/// of its direct children, keyed by local name (namespace prefixes dropped).
///
/// Returns `Ok(None)` when no such element exists. Only the first occurrence
/// of a repeated child is kept.
pub fn child_texts( document: &str, parent: &str ) -> Result<Option<HashMap<String, String>>, quick_xml::Error> {
    let mut reader = Reader::from_str( document );
    reader.config_mut().trim_text( true );

    let mut fields: Option<HashMap<String, String>> = None;
    let mut depth = 0usize;
    let mut current: Option<( String, String )> = None;

    loop {
        match reader.read_event()? {
            Event::Start( e ) => {
                let name = local_name( &e );
                if fields.is_some() {
                    depth += 1;
                    if depth == 2 {
                        current = Some(( name, String::new() ));
                    }
                } else if name == parent {
                    fields = Some( HashMap::new() );
                    depth = 1;
                }
            }
            Event::Empty( e ) => {
                let name = local_name( &e );
                if let Some( map ) = fields.as_mut() {
                    if depth == 1 {
                        map.entry( name ).or_default();
                    }
                } else if name == parent {
                    return Ok( Some( HashMap::new() ) );
                }
            }
            Event::Text( t ) => {
                if depth == 2 {
                    if let Some(( _, text )) = current.as_mut() {
                        text.push_str( &t.unescape()? );
                    }
                }
            }
            Event::CData( c ) => {
                if depth == 2 {
                    if let Some(( _, text )) = current.as_mut() {
                        text.push_str( &String::from_utf8_lossy( &c.into_inner() ) );
                    }
                }
            }
            Event::End( _ ) => {
                if let Some( map ) = fields.as_mut() {
                    if depth == 2 {
                        if let Some(( name, text )) = current.take() {
                            map.entry( name ).or_insert( text );
                        }
                    }
                    depth -= 1;
                    if depth == 0 {
                        return Ok( fields );
                    }
                }
            }
            // Truncated document: the parent never closed
            Event::Eof => return Ok( None ),
            _ => {}
        }
    }
}


fn local_name( e: &BytesStart<'_> ) -> String {
    String::from_utf8_lossy( e.local_name().as_ref() ).into_owned()
}


#[cfg( test )]
mod tests {
    use super::*;


    #[test]
    fn test_child_texts_drops_prefixes() {
        let doc = r#"<a:root xmlns:a="urn:x"><a:item><a:title>Hi</a:title><b>there</b></a:item></a:root>"#;
        let fields = child_texts( doc, "item" ).unwrap().unwrap();
        assert_eq!( fields[ "title" ], "Hi" );
        assert_eq!( fields[ "b" ], "there" );
    }


    #[test]
    fn test_child_texts_ignores_grandchildren() {
        let doc = "<item><outer><inner>deep</inner></outer><flat>yes</flat></item>";
        let fields = child_texts( doc, "item" ).unwrap().unwrap();
        assert_eq!( fields[ "outer" ], "" );
        assert_eq!( fields[ "flat" ], "yes" );
        assert!( !fields.contains_key( "inner" ) );
    }


    #[test]
    fn test_child_texts_unescapes() {
        let doc = "<r><v>&lt;DIDL-Lite&gt; &amp; more</v></r>";
        let fields = child_texts( doc, "r" ).unwrap().unwrap();
        assert_eq!( fields[ "v" ], "<DIDL-Lite> & more" );
    }


    #[test]
    fn test_child_texts_missing_parent() {
        assert!( child_texts( "<r><v>1</v></r>", "item" ).unwrap().is_none() );
    }


    #[test]
    fn test_child_texts_malformed() {
        assert!( child_texts( "<r><v>1</x></r>", "r" ).is_err() );
    }
}
